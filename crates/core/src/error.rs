//! Error types for the framecast codec and protocol.
//!
//! Codec operations return structured errors rather than panicking. The
//! sender and receiver catch most of them locally (falling back to a full
//! message, or deferring a segment) so they only surface through counters.

use thiserror::Error;

/// Top-level error type for all operations in the crate.
///
/// Each variant corresponds to a failure domain:
/// - BitFormat: a value does not fit the bit field it is written into
/// - Read: malformed or truncated input (bits, schema text, message text)
/// - TypeMismatch: schema/value shape mismatch, or a path naming nothing
/// - CannotComputeDelta: the difference is only expressible as a full message
/// - UnknownSchema: a schema number with no registered schema
#[derive(Debug, Error)]
pub enum Error {
    /// A value/width mismatch while building a bit field
    #[error("bit format error: {0}")]
    BitFormat(#[from] BitFormatError),

    /// Malformed or truncated input
    #[error("read error: {0}")]
    Read(#[from] ReadError),

    /// Schema or value shape mismatch
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Diff can only be expressed by sending the whole value
    #[error("cannot compute delta: {0}")]
    CannotComputeDelta(String),

    /// Schema number is not registered
    #[error("unknown schema number {0}")]
    UnknownSchema(u8),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn type_mismatch(msg: impl Into<String>) -> Self {
        Error::TypeMismatch(msg.into())
    }

    pub(crate) fn cannot_delta(msg: impl Into<String>) -> Self {
        Error::CannotComputeDelta(msg.into())
    }
}

/// Errors raised while constructing bit fields.
#[derive(Debug, Error)]
pub enum BitFormatError {
    /// Value needs more bits than the field provides
    #[error("value {value} does not fit in {width} bits")]
    ValueTooWide { value: u64, width: usize },

    /// Field width outside 0..=64
    #[error("invalid bit width: {0}")]
    InvalidWidth(usize),

    /// Byte array shorter than the requested bit length
    #[error("byte array too short: need {needed} bits, have {available}")]
    BytesTooShort { needed: usize, available: usize },

    /// Character outside the 6-bit text alphabet
    #[error("character {0:?} is not representable in smallscii")]
    UnencodableChar(char),

    /// A length or count exceeds its wire field
    #[error("{field} = {value} exceeds maximum {max}")]
    FieldOverflow {
        field: &'static str,
        value: usize,
        max: usize,
    },

    /// NoChange encoded outside delta content
    #[error("NoChange can only be encoded as delta content")]
    NoChangeOutsideDelta,

    /// Frame content exceeds the maximum frame length
    #[error("frame size {size} exceeds maximum {max} bits")]
    FrameTooLong { size: usize, max: usize },
}

/// Errors raised while decoding bits or parsing text.
#[derive(Debug, Error)]
pub enum ReadError {
    /// Attempted to take more bits than remain
    #[error("unexpected end of input: requested {requested} bits, available {available}")]
    UnexpectedEof { requested: usize, available: usize },

    /// Schema element discriminant not in the closed set
    #[error("unknown schema element tag {0}")]
    UnknownElementTag(u8),

    /// Segment type tag not in the closed set
    #[error("unknown segment tag {0}")]
    UnknownSegmentTag(u8),

    /// Frame was produced by a different protocol version
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u8, actual: u8 },

    /// Frame declares more bits than were received
    #[error("declared frame length {declared} exceeds {available} available bits")]
    DeclaredLengthExceedsInput { declared: usize, available: usize },

    /// Schema, message or path text could not be parsed
    #[error("syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },

    /// Smallscii text ran out of bits before its terminator
    #[error("text is missing its terminator")]
    MissingTerminator,

    /// Base64 transport text was invalid
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// A decoded field holds a value that is not allowed
    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: u64 },

    /// Delta does not line up with its reference
    #[error("delta does not match reference: {0}")]
    DeltaMismatch(String),

    /// Content decoded without consuming all of its bits
    #[error("{0} trailing bits after content")]
    TrailingBits(usize),
}

impl ReadError {
    pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
        ReadError::Syntax {
            position,
            message: message.into(),
        }
    }
}

/// Type alias for Result with our Error type
pub type Result<T> = std::result::Result<T, Error>;
