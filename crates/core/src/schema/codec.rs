//! Bit encodings of schemas and of content.
//!
//! # Schema Encoding
//! A 3-bit tag followed by variant fields:
//! ```text
//! Integer  : tag=6 | range (5) | delta range (5) | signed (1)
//! Smallscii: tag=2
//! Enum     : tag=1 | count (4) | count x Smallscii constant
//! List     : tag=3 | length (8) | element schema
//! FixedMap : tag=4 | count (6) | count x (Smallscii key | schema)
//! ```
//!
//! # Content Encoding
//! Full content carries no tags: integers in `range` bits (sign/magnitude
//! when signed), text as Smallscii, enums as an index in `ceil(log2(n))`
//! bits, lists as an 8-bit length then items, maps as values in key order.
//!
//! Delta content prefixes every element with a change bit. `0` is NoChange
//! and stops there; `1` is followed by the element's content, except that
//! integers carry a signed difference in `delta_range` bits.

use super::element::{
    EnumElement, FixedMapElement, IntegerElement, ListElement, SchemaElement, MAX_ENUM_CONSTANTS,
    MAX_LIST_LENGTH, MAX_MAP_KEYS,
};
use crate::bitio::BitBuffer;
use crate::error::{BitFormatError, Error, ReadError, Result};
use crate::smallscii;
use std::sync::Arc;

/// Width of the element discriminant.
pub const TAG_BITS: usize = 3;

const INTEGER_WIDTH_BITS: usize = 5;
const ENUM_COUNT_BITS: usize = 4;
const LIST_LENGTH_BITS: usize = 8;
const MAP_COUNT_BITS: usize = 6;

/// Element discriminants. 0 and 5 are reserved and never decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Tag {
    Enum = 1,
    Text = 2,
    List = 3,
    FixedMap = 4,
    Integer = 6,
}

impl Tag {
    fn from_bits(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Tag::Enum),
            2 => Ok(Tag::Text),
            3 => Ok(Tag::List),
            4 => Ok(Tag::FixedMap),
            6 => Ok(Tag::Integer),
            other => Err(ReadError::UnknownElementTag(other).into()),
        }
    }
}

fn count_field(field: &'static str, value: usize, max: usize) -> Result<u64> {
    if value > max {
        return Err(BitFormatError::FieldOverflow { field, value, max }.into());
    }
    Ok(value as u64)
}

impl SchemaElement {
    /// Append the schema (structure only) of this element.
    pub fn encode_schema(&self, out: &mut BitBuffer) -> Result<()> {
        match self {
            SchemaElement::Integer(int) => {
                out.push_bits(Tag::Integer as u64, TAG_BITS)?;
                out.push_bits(int.range() as u64, INTEGER_WIDTH_BITS)?;
                out.push_bits(int.delta_range() as u64, INTEGER_WIDTH_BITS)?;
                out.push_bit(int.is_signed());
            }
            SchemaElement::Text(_) => {
                out.push_bits(Tag::Text as u64, TAG_BITS)?;
            }
            SchemaElement::Enum(e) => {
                out.push_bits(Tag::Enum as u64, TAG_BITS)?;
                let count = count_field("enum constants", e.constants().len(), MAX_ENUM_CONSTANTS)?;
                out.push_bits(count, ENUM_COUNT_BITS)?;
                for constant in e.constants() {
                    smallscii::encode(constant, out)?;
                }
            }
            SchemaElement::List(list) => {
                out.push_bits(Tag::List as u64, TAG_BITS)?;
                let length = count_field("list length", list.len(), MAX_LIST_LENGTH)?;
                out.push_bits(length, LIST_LENGTH_BITS)?;
                list.element_type().encode_schema(out)?;
            }
            SchemaElement::FixedMap(map) => {
                out.push_bits(Tag::FixedMap as u64, TAG_BITS)?;
                let count = count_field("map key count", map.len(), MAX_MAP_KEYS)?;
                out.push_bits(count, MAP_COUNT_BITS)?;
                for (key, schema) in map.fields() {
                    smallscii::encode(key, out)?;
                    schema.encode_schema(out)?;
                }
            }
            SchemaElement::NoChange => {
                return Err(Error::type_mismatch("NoChange has no schema"));
            }
        }
        Ok(())
    }

    /// Schema encoding as a fresh buffer.
    pub fn schema_bits(&self) -> Result<BitBuffer> {
        let mut out = BitBuffer::new();
        self.encode_schema(&mut out)?;
        Ok(out)
    }

    /// Take a schema off the front of `bits`.
    ///
    /// The result has default content. Bits consumed can be measured from
    /// the change in `bits.len()`.
    ///
    /// # Errors
    /// `ReadError` on an unknown tag, an invalid field, or truncated input.
    pub fn decode_schema(bits: &mut BitBuffer) -> Result<SchemaElement> {
        let tag = Tag::from_bits(bits.take_bits(TAG_BITS)? as u8)?;
        match tag {
            Tag::Integer => {
                let range = bits.take_bits(INTEGER_WIDTH_BITS)? as u8;
                let delta_range = bits.take_bits(INTEGER_WIDTH_BITS)? as u8;
                let signed = bits.take_bit()?;
                if range == 0 || delta_range == 0 {
                    return Err(ReadError::InvalidField {
                        field: "integer width",
                        value: 0,
                    }
                    .into());
                }
                Ok(SchemaElement::Integer(IntegerElement::new(
                    range,
                    delta_range,
                    signed,
                )?))
            }
            Tag::Text => Ok(SchemaElement::Text(String::new())),
            Tag::Enum => {
                let count = bits.take_bits(ENUM_COUNT_BITS)? as usize;
                if count == 0 {
                    return Err(ReadError::InvalidField {
                        field: "enum constant count",
                        value: 0,
                    }
                    .into());
                }
                let mut constants = Vec::with_capacity(count);
                for _ in 0..count {
                    constants.push(smallscii::decode(bits)?);
                }
                Ok(SchemaElement::Enum(EnumElement::new(&constants)?))
            }
            Tag::List => {
                let length = bits.take_bits(LIST_LENGTH_BITS)? as usize;
                let element_type = SchemaElement::decode_schema(bits)?;
                Ok(SchemaElement::List(ListElement::with_length(
                    element_type,
                    length,
                )?))
            }
            Tag::FixedMap => {
                let count = bits.take_bits(MAP_COUNT_BITS)? as usize;
                let mut map = FixedMapElement::new();
                for _ in 0..count {
                    let key = smallscii::decode(bits)?;
                    let schema = SchemaElement::decode_schema(bits)?;
                    map.insert(&key, schema)?;
                }
                Ok(SchemaElement::FixedMap(map))
            }
        }
    }

    /// Append this element's content, in full or as delta content.
    ///
    /// # Errors
    /// - `BitFormatError::NoChangeOutsideDelta` for NoChange when `as_delta` is false
    /// - `BitFormatError` when a value or difference does not fit its field
    pub fn encode_content(&self, as_delta: bool, out: &mut BitBuffer) -> Result<()> {
        match self {
            SchemaElement::NoChange if !as_delta => {
                return Err(BitFormatError::NoChangeOutsideDelta.into());
            }
            SchemaElement::NoChange => out.push_bit(false),
            _ if as_delta => out.push_bit(true),
            _ => {}
        }

        match self {
            SchemaElement::Integer(int) => {
                if as_delta {
                    out.push_signed(int.value(), int.delta_range() as usize)?;
                } else if int.is_signed() {
                    out.push_signed(int.value(), int.range() as usize)?;
                } else if int.value() < 0 {
                    return Err(Error::type_mismatch(format!(
                        "negative value {} for unsigned integer",
                        int.value()
                    )));
                } else {
                    out.push_bits(int.value() as u64, int.range() as usize)?;
                }
            }
            SchemaElement::Text(text) => smallscii::encode(text, out)?,
            SchemaElement::Enum(e) => out.push_bits(e.index() as u64, e.index_bits())?,
            SchemaElement::List(list) => {
                let length = count_field("list length", list.len(), MAX_LIST_LENGTH)?;
                out.push_bits(length, LIST_LENGTH_BITS)?;
                for item in list.items() {
                    item.encode_content(as_delta, out)?;
                }
            }
            SchemaElement::FixedMap(map) => {
                for (_, value) in map.fields() {
                    value.encode_content(as_delta, out)?;
                }
            }
            SchemaElement::NoChange => {}
        }
        Ok(())
    }

    /// Content encoding as a fresh buffer.
    pub fn content_bits(&self, as_delta: bool) -> Result<BitBuffer> {
        let mut out = BitBuffer::new();
        self.encode_content(as_delta, &mut out)?;
        Ok(out)
    }

    /// Decode content shaped like `self` (the schema) off the front of `bits`.
    ///
    /// `self` is never modified; the result is a new element. With `as_delta`,
    /// a leading `0` bit yields NoChange without consuming anything further.
    pub fn decode_content(&self, bits: &mut BitBuffer, as_delta: bool) -> Result<SchemaElement> {
        if as_delta && !bits.take_bit()? {
            return Ok(SchemaElement::NoChange);
        }

        match self {
            SchemaElement::Integer(int) => {
                if as_delta {
                    let delta = bits.take_signed(int.delta_range() as usize)?;
                    return Ok(SchemaElement::Integer(IntegerElement::delta_of(int, delta)));
                }
                let value = if int.is_signed() {
                    bits.take_signed(int.range() as usize)?
                } else {
                    bits.take_bits(int.range() as usize)? as i64
                };
                let mut decoded = *int;
                decoded.set_value(value)?;
                Ok(SchemaElement::Integer(decoded))
            }
            SchemaElement::Text(_) => Ok(SchemaElement::Text(smallscii::decode(bits)?)),
            SchemaElement::Enum(e) => {
                let index = bits.take_bits(e.index_bits())? as usize;
                if index >= e.constants().len() {
                    return Err(ReadError::InvalidField {
                        field: "enum index",
                        value: index as u64,
                    }
                    .into());
                }
                let mut decoded = e.clone();
                decoded.set_index(index)?;
                Ok(SchemaElement::Enum(decoded))
            }
            SchemaElement::List(list) => {
                let length = bits.take_bits(LIST_LENGTH_BITS)? as usize;
                let mut items = Vec::with_capacity(length);
                for _ in 0..length {
                    items.push(list.element_type().decode_content(bits, as_delta)?);
                }
                Ok(SchemaElement::List(ListElement::from_parts(
                    Arc::clone(list.element_type_arc()),
                    items,
                )))
            }
            SchemaElement::FixedMap(map) => {
                let mut fields = Vec::with_capacity(map.len());
                for (key, schema) in map.fields() {
                    fields.push((key.clone(), schema.decode_content(bits, as_delta)?));
                }
                Ok(SchemaElement::FixedMap(FixedMapElement::from_fields(fields)))
            }
            SchemaElement::NoChange => Err(Error::type_mismatch("NoChange is not a schema")),
        }
    }

    /// Decode content that must span `bits` exactly.
    ///
    /// # Errors
    /// `ReadError::TrailingBits` if bits remain after the content.
    pub fn decode_content_exact(&self, mut bits: BitBuffer, as_delta: bool) -> Result<SchemaElement> {
        let decoded = self.decode_content(&mut bits, as_delta)?;
        if !bits.is_empty() {
            return Err(ReadError::TrailingBits(bits.len()).into());
        }
        Ok(decoded)
    }
}
