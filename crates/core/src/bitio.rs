//! Bit buffers: the substrate for every wire value.
//!
//! `BitBuffer` is an ordered, appendable sequence of bits that is consumed
//! from the front. Encoders append fixed-width fields; decoders take fields
//! off the front, so a decoder always sees exactly the bits that remain.
//!
//! # Bit Order
//! Fields are written MSB-first, and bits are packed MSB-first into bytes.
//! `to_bytes` pads the final partial byte with trailing zeros.
//!
//! # Example
//! ```
//! use framecast_core::bitio::BitBuffer;
//!
//! let mut bits = BitBuffer::new();
//! bits.push_bits(0b101, 3).unwrap();
//! bits.push_bits(0b11, 2).unwrap();
//! assert_eq!(bits.len(), 5);
//! assert_eq!(bits.to_bytes(), vec![0b1011_1000]);
//!
//! assert_eq!(bits.take_bits(3).unwrap(), 0b101);
//! assert_eq!(bits.take_bits(2).unwrap(), 0b11);
//! assert!(bits.is_empty());
//! ```

use crate::error::{BitFormatError, ReadError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;

/// Compact the backing storage once this many whole bytes have been consumed.
const COMPACT_THRESHOLD_BYTES: usize = 64;

/// An ordered, FIFO-consumable sequence of bits.
///
/// # Invariants
/// - Live bits occupy positions `head..tail` of the packed `bytes`
/// - Bits at positions `>= tail` inside the last byte are always zero
/// - `len()` always equals the number of bits logically remaining
#[derive(Clone, Default)]
pub struct BitBuffer {
    /// Packed storage, MSB-first within each byte
    bytes: Vec<u8>,
    /// Position of the first live bit
    head: usize,
    /// Position one past the last live bit
    tail: usize,
}

impl BitBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a buffer holding `value` in exactly `width` bits.
    ///
    /// # Errors
    /// Returns `BitFormatError::ValueTooWide` if `value > 2^width - 1` and
    /// `BitFormatError::InvalidWidth` if `width > 64`.
    pub fn from_value(value: u64, width: usize) -> Result<Self> {
        let mut bits = Self::new();
        bits.push_bits(value, width)?;
        Ok(bits)
    }

    /// Build a buffer holding `value` as 1 sign bit + `width - 1` magnitude bits.
    ///
    /// Sign bit 0 means non-negative.
    pub fn from_signed(value: i64, width: usize) -> Result<Self> {
        let mut bits = Self::new();
        bits.push_signed(value, width)?;
        Ok(bits)
    }

    /// Build a buffer from the first `bit_len` bits of `bytes`.
    ///
    /// # Errors
    /// Returns `BitFormatError::BytesTooShort` if `bytes` holds fewer than
    /// `bit_len` bits.
    pub fn from_bytes(bytes: &[u8], bit_len: usize) -> Result<Self> {
        let available = bytes.len() * 8;
        if bit_len > available {
            return Err(BitFormatError::BytesTooShort {
                needed: bit_len,
                available,
            }
            .into());
        }

        let mut stored = bytes[..bit_len.div_ceil(8)].to_vec();
        let spare = stored.len() * 8 - bit_len;
        if let Some(last) = stored.last_mut() {
            *last &= 0xFFu8 << spare;
        }

        Ok(Self {
            bytes: stored,
            head: 0,
            tail: bit_len,
        })
    }

    /// Decode base64 transport text. Every decoded byte contributes 8 bits.
    pub fn from_base64(text: &str) -> Result<Self> {
        let bytes = STANDARD.decode(text.trim()).map_err(ReadError::from)?;
        Self::from_bytes(&bytes, bytes.len() * 8)
    }

    /// Number of bits remaining.
    pub fn len(&self) -> usize {
        self.tail - self.head
    }

    /// True if no bits remain.
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Read the bit at `index` (relative to the front) without consuming it.
    pub fn get(&self, index: usize) -> Option<bool> {
        if index >= self.len() {
            return None;
        }
        Some(self.raw_bit(self.head + index))
    }

    /// Iterate over the remaining bits, front first.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (self.head..self.tail).map(move |pos| self.raw_bit(pos))
    }

    /// Append a single bit.
    pub fn push_bit(&mut self, bit: bool) {
        if self.tail % 8 == 0 {
            self.bytes.push(0);
        }
        if bit {
            self.bytes[self.tail / 8] |= 0x80 >> (self.tail % 8);
        }
        self.tail += 1;
    }

    /// Append the lowest `width` bits of `value`, MSB-first.
    ///
    /// # Errors
    /// - `BitFormatError::InvalidWidth` if `width > 64`
    /// - `BitFormatError::ValueTooWide` if `value` needs more than `width` bits
    pub fn push_bits(&mut self, value: u64, width: usize) -> Result<()> {
        if width > 64 {
            return Err(BitFormatError::InvalidWidth(width).into());
        }
        if width < 64 && value >> width != 0 {
            return Err(BitFormatError::ValueTooWide { value, width }.into());
        }

        for shift in (0..width).rev() {
            self.push_bit((value >> shift) & 1 == 1);
        }
        Ok(())
    }

    /// Append `value` as 1 sign bit followed by `width - 1` magnitude bits.
    ///
    /// # Errors
    /// `BitFormatError::ValueTooWide` if the magnitude needs more than
    /// `width - 1` bits, `BitFormatError::InvalidWidth` if `width` is 0.
    pub fn push_signed(&mut self, value: i64, width: usize) -> Result<()> {
        if width == 0 || width > 64 {
            return Err(BitFormatError::InvalidWidth(width).into());
        }
        let magnitude = value.unsigned_abs();
        let magnitude_width = width - 1;
        if magnitude_width < 64 && magnitude >> magnitude_width != 0 {
            return Err(BitFormatError::ValueTooWide {
                value: magnitude,
                width: magnitude_width,
            }
            .into());
        }

        self.push_bit(value < 0);
        self.push_bits(magnitude, magnitude_width)
    }

    /// Append every bit of `other`.
    pub fn append(&mut self, other: &BitBuffer) {
        for bit in other.iter() {
            self.push_bit(bit);
        }
    }

    /// Append zero bits until the buffer holds `len` bits.
    pub fn pad_to(&mut self, len: usize) {
        while self.len() < len {
            self.push_bit(false);
        }
    }

    /// Remove and return the first `n` bits.
    ///
    /// If `n` exceeds the remaining length, everything is removed and returned.
    pub fn truncate_prefix(&mut self, n: usize) -> BitBuffer {
        let n = n.min(self.len());
        let mut prefix = BitBuffer::new();
        for pos in self.head..self.head + n {
            prefix.push_bit(self.raw_bit(pos));
        }
        self.consume(n);
        prefix
    }

    /// Remove exactly `n` bits from the front and return them.
    ///
    /// # Errors
    /// `ReadError::UnexpectedEof` if fewer than `n` bits remain.
    pub fn take(&mut self, n: usize) -> Result<BitBuffer> {
        self.ensure(n)?;
        Ok(self.truncate_prefix(n))
    }

    /// Remove a `width`-bit unsigned field from the front.
    ///
    /// # Errors
    /// - `BitFormatError::InvalidWidth` if `width > 64`
    /// - `ReadError::UnexpectedEof` if fewer than `width` bits remain
    pub fn take_bits(&mut self, width: usize) -> Result<u64> {
        if width > 64 {
            return Err(BitFormatError::InvalidWidth(width).into());
        }
        self.ensure(width)?;

        let mut value = 0u64;
        for pos in self.head..self.head + width {
            value = (value << 1) | self.raw_bit(pos) as u64;
        }
        self.consume(width);
        Ok(value)
    }

    /// Remove a single bit from the front.
    pub fn take_bit(&mut self) -> Result<bool> {
        Ok(self.take_bits(1)? == 1)
    }

    /// Remove a sign/magnitude field of `width` bits from the front.
    pub fn take_signed(&mut self, width: usize) -> Result<i64> {
        if width == 0 || width > 64 {
            return Err(BitFormatError::InvalidWidth(width).into());
        }
        self.ensure(width)?;
        let negative = self.take_bit()?;
        let magnitude = self.take_bits(width - 1)? as i64;
        Ok(if negative { -magnitude } else { magnitude })
    }

    /// Interpret the whole buffer as a big-endian unsigned integer.
    ///
    /// Only the lowest 64 bits survive for longer buffers.
    pub fn int_value(&self) -> u64 {
        self.iter().fold(0u64, |acc, bit| (acc << 1) | bit as u64)
    }

    /// Pack into bytes, zero-padding the final byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.head % 8 == 0 {
            return self.bytes[self.head / 8..].to_vec();
        }

        let mut out = vec![0u8; self.len().div_ceil(8)];
        for (i, bit) in self.iter().enumerate() {
            if bit {
                out[i / 8] |= 0x80 >> (i % 8);
            }
        }
        out
    }

    /// Encode as base64 text (of `to_bytes`).
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    fn raw_bit(&self, pos: usize) -> bool {
        (self.bytes[pos / 8] >> (7 - pos % 8)) & 1 == 1
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if n > self.len() {
            return Err(ReadError::UnexpectedEof {
                requested: n,
                available: self.len(),
            }
            .into());
        }
        Ok(())
    }

    fn consume(&mut self, n: usize) {
        self.head += n;
        if self.head == self.tail {
            self.bytes.clear();
            self.head = 0;
            self.tail = 0;
        } else if self.head / 8 >= COMPACT_THRESHOLD_BYTES {
            let whole = self.head / 8;
            self.bytes.drain(..whole);
            self.head -= whole * 8;
            self.tail -= whole * 8;
        }
    }
}

impl PartialEq for BitBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl Eq for BitBuffer {}

impl fmt::Display for BitBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in self.iter() {
            f.write_str(if bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl fmt::Debug for BitBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitBuffer({} bits: {})", self.len(), self)
    }
}

impl FromIterator<bool> for BitBuffer {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let mut bits = BitBuffer::new();
        for bit in iter {
            bits.push_bit(bit);
        }
        bits
    }
}
