//! Segments: the atomic, numbered units of transmission.
//!
//! # Segment Format
//!
//! ```text
//! +-------------+--------------+---------------------------------------+
//! | type (2)    | seq (12)     | body                                  |
//! +-------------+--------------+---------------------------------------+
//!
//! Blob    (0): length (12) | contents
//! Message (1): length (12) | schema number (4) | contents
//! Schema  (2): schema number (4) | schema definition (self-delimiting)
//! Delta   (3): length (12) | reference seq (12) | contents
//! ```
//!
//! Message and delta contents are schema-encoded content bits; blob
//! contents are opaque.

use crate::bitio::BitBuffer;
use crate::error::{BitFormatError, ReadError, Result};
use crate::schema::SchemaElement;
use crate::seq::{SeqNum, SEQ_BITS};
use std::sync::Arc;

/// Width of the segment type tag.
pub const TYPE_BITS: usize = 2;

/// Width of a content length field.
pub const LENGTH_BITS: usize = 12;

/// Width of a schema number.
pub const SCHEMA_NUMBER_BITS: usize = 4;

/// Largest content a segment can carry.
pub const MAX_CONTENT_BITS: usize = (1 << LENGTH_BITS) - 1;

/// Number of schema slots.
pub const SCHEMA_SLOTS: usize = 1 << SCHEMA_NUMBER_BITS;

/// Bits a blob segment spends before its contents.
pub const BLOB_HEADER_BITS: usize = TYPE_BITS + SEQ_BITS + LENGTH_BITS;

/// Segment categories, in wire tag order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    Blob = 0,
    Message = 1,
    Schema = 2,
    Delta = 3,
}

impl SegmentKind {
    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(SegmentKind::Blob),
            1 => Ok(SegmentKind::Message),
            2 => Ok(SegmentKind::Schema),
            3 => Ok(SegmentKind::Delta),
            other => Err(ReadError::UnknownSegmentTag(other).into()),
        }
    }
}

/// A typed, numbered chunk of bits.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Blob {
        seq: SeqNum,
        contents: BitBuffer,
    },
    Message {
        seq: SeqNum,
        schema_number: u8,
        contents: BitBuffer,
    },
    Schema {
        seq: SeqNum,
        schema_number: u8,
        schema: Arc<SchemaElement>,
        /// The schema's bit encoding, kept so sizes need no re-encoding
        definition: BitBuffer,
    },
    Delta {
        seq: SeqNum,
        reference: SeqNum,
        contents: BitBuffer,
    },
}

fn check_contents(contents: &BitBuffer) -> Result<()> {
    if contents.len() > MAX_CONTENT_BITS {
        return Err(BitFormatError::FieldOverflow {
            field: "segment content length",
            value: contents.len(),
            max: MAX_CONTENT_BITS,
        }
        .into());
    }
    Ok(())
}

fn check_schema_number(schema_number: u8) -> Result<()> {
    if schema_number as usize >= SCHEMA_SLOTS {
        return Err(BitFormatError::FieldOverflow {
            field: "schema number",
            value: schema_number as usize,
            max: SCHEMA_SLOTS - 1,
        }
        .into());
    }
    Ok(())
}

impl Segment {
    pub fn blob(seq: SeqNum, contents: BitBuffer) -> Result<Self> {
        check_contents(&contents)?;
        Ok(Segment::Blob { seq, contents })
    }

    pub fn message(seq: SeqNum, schema_number: u8, contents: BitBuffer) -> Result<Self> {
        check_schema_number(schema_number)?;
        check_contents(&contents)?;
        Ok(Segment::Message {
            seq,
            schema_number,
            contents,
        })
    }

    pub fn schema(seq: SeqNum, schema_number: u8, schema: Arc<SchemaElement>) -> Result<Self> {
        check_schema_number(schema_number)?;
        let definition = schema.schema_bits()?;
        Ok(Segment::Schema {
            seq,
            schema_number,
            schema,
            definition,
        })
    }

    pub fn delta(seq: SeqNum, reference: SeqNum, contents: BitBuffer) -> Result<Self> {
        check_contents(&contents)?;
        Ok(Segment::Delta {
            seq,
            reference,
            contents,
        })
    }

    pub fn seq(&self) -> SeqNum {
        match self {
            Segment::Blob { seq, .. }
            | Segment::Message { seq, .. }
            | Segment::Schema { seq, .. }
            | Segment::Delta { seq, .. } => *seq,
        }
    }

    pub fn kind(&self) -> SegmentKind {
        match self {
            Segment::Blob { .. } => SegmentKind::Blob,
            Segment::Message { .. } => SegmentKind::Message,
            Segment::Schema { .. } => SegmentKind::Schema,
            Segment::Delta { .. } => SegmentKind::Delta,
        }
    }

    /// Encoded size in bits.
    pub fn size(&self) -> usize {
        let header = TYPE_BITS + SEQ_BITS;
        header
            + match self {
                Segment::Blob { contents, .. } => LENGTH_BITS + contents.len(),
                Segment::Message { contents, .. } => {
                    LENGTH_BITS + SCHEMA_NUMBER_BITS + contents.len()
                }
                Segment::Schema { definition, .. } => SCHEMA_NUMBER_BITS + definition.len(),
                Segment::Delta { contents, .. } => LENGTH_BITS + SEQ_BITS + contents.len(),
            }
    }

    /// Append this segment's encoding.
    pub fn encode(&self, out: &mut BitBuffer) -> Result<()> {
        out.push_bits(self.kind() as u64, TYPE_BITS)?;
        out.push_bits(self.seq().value() as u64, SEQ_BITS)?;
        match self {
            Segment::Blob { contents, .. } => {
                out.push_bits(contents.len() as u64, LENGTH_BITS)?;
                out.append(contents);
            }
            Segment::Message {
                schema_number,
                contents,
                ..
            } => {
                out.push_bits(contents.len() as u64, LENGTH_BITS)?;
                out.push_bits(*schema_number as u64, SCHEMA_NUMBER_BITS)?;
                out.append(contents);
            }
            Segment::Schema {
                schema_number,
                definition,
                ..
            } => {
                out.push_bits(*schema_number as u64, SCHEMA_NUMBER_BITS)?;
                out.append(definition);
            }
            Segment::Delta {
                reference,
                contents,
                ..
            } => {
                out.push_bits(contents.len() as u64, LENGTH_BITS)?;
                out.push_bits(reference.value() as u64, SEQ_BITS)?;
                out.append(contents);
            }
        }
        Ok(())
    }

    /// Encoding as a fresh buffer.
    pub fn to_bits(&self) -> Result<BitBuffer> {
        let mut out = BitBuffer::new();
        self.encode(&mut out)?;
        Ok(out)
    }

    /// Take one segment off the front of `bits`.
    ///
    /// # Errors
    /// `ReadError` if the input is truncated or the schema definition of a
    /// schema segment does not decode.
    pub fn decode(bits: &mut BitBuffer) -> Result<Segment> {
        let kind = SegmentKind::from_tag(bits.take_bits(TYPE_BITS)? as u8)?;
        let seq = SeqNum::new(bits.take_bits(SEQ_BITS)? as u32);
        match kind {
            SegmentKind::Blob => {
                let length = bits.take_bits(LENGTH_BITS)? as usize;
                let contents = bits.take(length)?;
                Ok(Segment::Blob { seq, contents })
            }
            SegmentKind::Message => {
                let length = bits.take_bits(LENGTH_BITS)? as usize;
                let schema_number = bits.take_bits(SCHEMA_NUMBER_BITS)? as u8;
                let contents = bits.take(length)?;
                Ok(Segment::Message {
                    seq,
                    schema_number,
                    contents,
                })
            }
            SegmentKind::Schema => {
                let schema_number = bits.take_bits(SCHEMA_NUMBER_BITS)? as u8;
                let before = bits.len();
                let mut snapshot = bits.clone();
                let schema = SchemaElement::decode_schema(bits)?;
                let definition = snapshot.truncate_prefix(before - bits.len());
                Ok(Segment::Schema {
                    seq,
                    schema_number,
                    schema: Arc::new(schema),
                    definition,
                })
            }
            SegmentKind::Delta => {
                let length = bits.take_bits(LENGTH_BITS)? as usize;
                let reference = SeqNum::new(bits.take_bits(SEQ_BITS)? as u32);
                let contents = bits.take(length)?;
                Ok(Segment::Delta {
                    seq,
                    reference,
                    contents,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn reading_schema() -> Arc<SchemaElement> {
        Arc::new(
            SchemaElement::parse_schema(r#"FixedMap { "name": Smallscii, "value": Integer(8) }"#)
                .unwrap(),
        )
    }

    fn all_kinds() -> Vec<Segment> {
        vec![
            Segment::blob(SeqNum::new(1), BitBuffer::from_value(0xABC, 12).unwrap()).unwrap(),
            Segment::message(SeqNum::new(4095), 15, BitBuffer::from_value(5, 3).unwrap()).unwrap(),
            Segment::schema(SeqNum::new(7), 2, reading_schema()).unwrap(),
            Segment::delta(SeqNum::new(9), SeqNum::new(8), BitBuffer::from_value(1, 1).unwrap())
                .unwrap(),
            Segment::blob(SeqNum::new(0), BitBuffer::new()).unwrap(),
        ]
    }

    #[test]
    fn test_sizes_match_encoding() {
        for segment in all_kinds() {
            assert_eq!(segment.to_bits().unwrap().len(), segment.size(), "{segment:?}");
        }
    }

    #[test]
    fn test_declared_widths() {
        let message = Segment::message(SeqNum::ZERO, 0, BitBuffer::from_value(0, 10).unwrap());
        assert_eq!(message.unwrap().size(), 2 + 12 + 12 + 4 + 10);
        let delta = Segment::delta(SeqNum::ZERO, SeqNum::ZERO, BitBuffer::from_value(0, 10).unwrap());
        assert_eq!(delta.unwrap().size(), 2 + 12 + 12 + 12 + 10);
        let blob = Segment::blob(SeqNum::ZERO, BitBuffer::from_value(0, 10).unwrap());
        assert_eq!(blob.unwrap().size(), 2 + 12 + 12 + 10);
        let schema = Segment::schema(SeqNum::ZERO, 0, reading_schema()).unwrap();
        assert_eq!(schema.size(), 2 + 12 + 4 + 92);
    }

    #[test]
    fn test_round_trip_back_to_back() {
        let segments = all_kinds();
        let mut bits = BitBuffer::new();
        for segment in &segments {
            segment.encode(&mut bits).unwrap();
        }
        for expected in &segments {
            assert_eq!(&Segment::decode(&mut bits).unwrap(), expected);
        }
        assert!(bits.is_empty());
    }

    #[test]
    fn test_header_layout() {
        let segment =
            Segment::delta(SeqNum::new(3), SeqNum::new(1), BitBuffer::from_value(1, 1).unwrap())
                .unwrap();
        assert_eq!(
            segment.to_bits().unwrap().to_string(),
            ["11", "000000000011", "000000000001", "000000000001", "1"].concat()
        );
    }

    #[test]
    fn test_limits() {
        let mut big = BitBuffer::new();
        big.pad_to(MAX_CONTENT_BITS + 1);
        assert!(matches!(
            Segment::blob(SeqNum::ZERO, big),
            Err(Error::BitFormat(BitFormatError::FieldOverflow { .. }))
        ));
        assert!(Segment::message(SeqNum::ZERO, 16, BitBuffer::new()).is_err());
    }

    #[test]
    fn test_truncated_segment() {
        let bits = Segment::message(SeqNum::new(5), 1, BitBuffer::from_value(0xFF, 8).unwrap())
            .unwrap()
            .to_bits()
            .unwrap();
        let mut short = bits.clone().truncate_prefix(bits.len() - 1);
        assert!(matches!(
            Segment::decode(&mut short),
            Err(Error::Read(ReadError::UnexpectedEof { .. }))
        ));
    }
}
