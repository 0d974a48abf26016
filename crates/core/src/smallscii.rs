//! Smallscii: a 6-bit text encoding.
//!
//! Each symbol is the 1-based index of a character in a fixed 63-character
//! table; code 0 terminates the string. Upper-case letters are folded to
//! lower case before encoding, so decoded text is always lower case.

use crate::bitio::BitBuffer;
use crate::error::{BitFormatError, ReadError, Result};

/// Bits per symbol.
pub const SYMBOL_BITS: usize = 6;

/// The symbol table. Code `n` (1..=63) is `ALPHABET[n - 1]`.
pub const ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz0123456789.,!@#$%&*^()[]-+=<> |/\\'{}:";

const TERMINATOR: u64 = 0;

/// Code for a character, after lower-case folding.
pub fn code_of(c: char) -> Option<u8> {
    let c = c.to_ascii_lowercase();
    ALPHABET.chars().position(|a| a == c).map(|i| i as u8 + 1)
}

/// Character for a code in `1..=63`.
pub fn char_of(code: u8) -> Option<char> {
    if code == 0 {
        return None;
    }
    ALPHABET.chars().nth(code as usize - 1)
}

/// Fold `text` to the form it will have after a round trip.
///
/// # Errors
/// `BitFormatError::UnencodableChar` for characters outside the table.
pub fn normalize(text: &str) -> Result<String> {
    text.chars()
        .map(|c| match code_of(c) {
            Some(_) => Ok(c.to_ascii_lowercase()),
            None => Err(BitFormatError::UnencodableChar(c).into()),
        })
        .collect()
}

/// Encoded size of `text` in bits, terminator included.
pub fn encoded_len(text: &str) -> usize {
    (text.chars().count() + 1) * SYMBOL_BITS
}

/// Append `text` and its terminator.
pub fn encode(text: &str, out: &mut BitBuffer) -> Result<()> {
    for c in text.chars() {
        let code = code_of(c).ok_or(BitFormatError::UnencodableChar(c))?;
        out.push_bits(code as u64, SYMBOL_BITS)?;
    }
    out.push_bits(TERMINATOR, SYMBOL_BITS)
}

/// Take a terminated string off the front of `bits`.
///
/// # Errors
/// `ReadError::MissingTerminator` if the bits run out first.
pub fn decode(bits: &mut BitBuffer) -> Result<String> {
    let mut text = String::new();
    loop {
        if bits.len() < SYMBOL_BITS {
            return Err(ReadError::MissingTerminator.into());
        }
        let code = bits.take_bits(SYMBOL_BITS)? as u8;
        match char_of(code) {
            Some(c) => text.push(c),
            None => return Ok(text),
        }
    }
}
