//! Frames: one physical transmission unit.
//!
//! # Frame Format
//!
//! ```text
//! +--------------+-------------+-------------------+--------------------+
//! | version (4)  | length (14) | stream index (16) | total segments (16)|
//! +--------------+-------------+-------------------+--------------------+
//! | resource identifier (Smallscii)                                     |
//! +---------------------------------------------------------------------+
//! | segment | segment | ...                          | zero padding     |
//! +---------------------------------------------------------------------+
//! ```
//!
//! `length` counts every bit from the version field to the end of the
//! last segment; padding up to the configured maximum is not included.
//! A total segment count of 0 means stream mode; any other value is the
//! size of a lake.

use crate::bitio::BitBuffer;
use crate::error::{BitFormatError, ReadError, Result};
use crate::segment::Segment;
use crate::smallscii;
use std::sync::Arc;

/// Protocol version written in every frame.
pub const VERSION: u8 = 1;

pub const VERSION_BITS: usize = 4;
pub const LENGTH_BITS: usize = 14;
pub const STREAM_INDEX_BITS: usize = 16;
pub const TOTAL_SEGMENTS_BITS: usize = 16;

/// Largest length the header can declare.
pub const MAX_FRAME_BITS: usize = (1 << LENGTH_BITS) - 1;

/// Header bits before the resource identifier.
const FIXED_HEADER_BITS: usize = VERSION_BITS + LENGTH_BITS + STREAM_INDEX_BITS + TOTAL_SEGMENTS_BITS;

/// A header plus an ordered list of segments.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    /// Data stream this frame belongs to
    pub data_stream_index: u16,

    /// Number of segments in the lake, or 0 in stream mode
    pub total_segments: u16,

    /// Name of the resource being transmitted
    pub resource_identifier: String,

    /// Segments in transmission order
    pub segments: Vec<Arc<Segment>>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Header size in bits, which depends on the resource identifier.
    pub fn header_size(&self) -> usize {
        FIXED_HEADER_BITS + smallscii::encoded_len(&self.resource_identifier)
    }

    /// Total bits of all segments.
    pub fn content_size(&self) -> usize {
        self.segments.iter().map(|s| s.size()).sum()
    }

    /// Encoded size in bits, excluding padding.
    pub fn size(&self) -> usize {
        self.header_size() + self.content_size()
    }

    pub fn push(&mut self, segment: Arc<Segment>) {
        self.segments.push(segment);
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Encode and zero-pad to `max_length` bits.
    ///
    /// # Errors
    /// `BitFormatError::FrameTooLong` if header plus segments exceed
    /// `max_length` (or the 14-bit length field).
    pub fn encode(&self, max_length: usize) -> Result<BitBuffer> {
        let size = self.size();
        let max = max_length.min(MAX_FRAME_BITS);
        if size > max {
            return Err(BitFormatError::FrameTooLong { size, max }.into());
        }

        let mut out = BitBuffer::new();
        out.push_bits(VERSION as u64, VERSION_BITS)?;
        out.push_bits(size as u64, LENGTH_BITS)?;
        out.push_bits(self.data_stream_index as u64, STREAM_INDEX_BITS)?;
        out.push_bits(self.total_segments as u64, TOTAL_SEGMENTS_BITS)?;
        smallscii::encode(&self.resource_identifier, &mut out)?;
        for segment in &self.segments {
            segment.encode(&mut out)?;
        }
        out.pad_to(max_length);
        Ok(out)
    }

    /// Decode a frame, ignoring anything after its declared length.
    ///
    /// # Errors
    /// - `ReadError::VersionMismatch` for another protocol version
    /// - `ReadError::DeclaredLengthExceedsInput` if the frame is cut short
    /// - `ReadError::UnknownSegmentTag` or truncation inside a segment
    /// - `ReadError::InvalidField` if the last segment overruns the declared length
    pub fn decode(mut bits: BitBuffer) -> Result<Frame> {
        let available = bits.len();
        let version = bits.take_bits(VERSION_BITS)? as u8;
        if version != VERSION {
            return Err(ReadError::VersionMismatch {
                expected: VERSION,
                actual: version,
            }
            .into());
        }

        let declared = bits.take_bits(LENGTH_BITS)? as usize;
        if declared > available {
            return Err(ReadError::DeclaredLengthExceedsInput {
                declared,
                available,
            }
            .into());
        }

        let mut frame = Frame {
            data_stream_index: bits.take_bits(STREAM_INDEX_BITS)? as u16,
            total_segments: bits.take_bits(TOTAL_SEGMENTS_BITS)? as u16,
            resource_identifier: smallscii::decode(&mut bits)?,
            segments: Vec::new(),
        };

        let consumed = |bits: &BitBuffer| available - bits.len();
        while consumed(&bits) < declared {
            frame.segments.push(Arc::new(Segment::decode(&mut bits)?));
        }
        if consumed(&bits) != declared {
            return Err(ReadError::InvalidField {
                field: "frame length",
                value: declared as u64,
            }
            .into());
        }

        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::seq::SeqNum;

    fn blob(seq: u32, bits: usize) -> Arc<Segment> {
        let mut contents = BitBuffer::new();
        contents.pad_to(bits);
        Arc::new(Segment::blob(SeqNum::new(seq), contents).unwrap())
    }

    fn sample_frame() -> Frame {
        Frame {
            data_stream_index: 3,
            total_segments: 0,
            resource_identifier: "log.txt".into(),
            segments: vec![
                blob(0, 20),
                Arc::new(
                    Segment::message(SeqNum::new(1), 2, BitBuffer::from_value(9, 4).unwrap())
                        .unwrap(),
                ),
            ],
        }
    }

    #[test]
    fn test_header_size() {
        let mut frame = Frame::new();
        assert_eq!(frame.header_size(), 4 + 14 + 16 + 16 + 6);
        frame.resource_identifier = "abc".into();
        assert_eq!(frame.header_size(), 50 + 4 * 6);
    }

    #[test]
    fn test_encode_decode() {
        let frame = sample_frame();
        let bits = frame.encode(512).unwrap();
        assert_eq!(bits.len(), 512);
        assert_eq!(Frame::decode(bits).unwrap(), frame);
    }

    #[test]
    fn test_size_matches_unpadded_encoding() {
        let frame = sample_frame();
        let bits = frame.encode(0).unwrap_err();
        assert!(matches!(bits, Error::BitFormat(BitFormatError::FrameTooLong { .. })));

        let exact = frame.encode(frame.size()).unwrap();
        assert_eq!(exact.len(), frame.size());
        assert_eq!(Frame::decode(exact).unwrap(), frame);
    }

    #[test]
    fn test_length_field_covers_whole_frame() {
        let frame = sample_frame();
        let mut bits = frame.encode(512).unwrap();
        bits.truncate_prefix(VERSION_BITS);
        assert_eq!(bits.take_bits(LENGTH_BITS).unwrap() as usize, frame.size());
    }

    #[test]
    fn test_version_mismatch() {
        let mut bits = BitBuffer::from_value(2, VERSION_BITS).unwrap();
        bits.pad_to(200);
        assert!(matches!(
            Frame::decode(bits),
            Err(Error::Read(ReadError::VersionMismatch {
                expected: 1,
                actual: 2
            }))
        ));
    }

    #[test]
    fn test_truncated_frame() {
        let frame = sample_frame();
        let mut bits = frame.encode(512).unwrap();
        let short = bits.truncate_prefix(frame.size() - 8);
        assert!(matches!(
            Frame::decode(short),
            Err(Error::Read(ReadError::DeclaredLengthExceedsInput { .. }))
        ));
    }

    #[test]
    fn test_length_ending_inside_segment() {
        let frame = Frame::new();
        let mut bits = BitBuffer::new();
        bits.push_bits(VERSION as u64, VERSION_BITS).unwrap();
        bits.push_bits((frame.header_size() + 5) as u64, LENGTH_BITS).unwrap();
        bits.push_bits(0, STREAM_INDEX_BITS + TOTAL_SEGMENTS_BITS).unwrap();
        bits.pad_to(frame.header_size() + 64);
        assert!(Frame::decode(bits).is_err());
    }

    #[test]
    fn test_empty_frame() {
        let frame = Frame::new();
        let bits = frame.encode(64).unwrap();
        let decoded = Frame::decode(bits).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_max_length_clamped_to_length_field() {
        let mut frame = Frame::new();
        frame.push(blob(0, 4095));
        frame.push(blob(1, 4095));
        frame.push(blob(2, 4095));
        frame.push(blob(3, 4095));
        assert!(frame.size() > MAX_FRAME_BITS);
        assert!(frame.encode(1 << 15).is_err());
    }
}
