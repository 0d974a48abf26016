//! Schema element types and their content.
//!
//! A `SchemaElement` is both a type descriptor and a value: the structural
//! fields (integer widths, enum constants, list element type, map keys)
//! describe the schema, and the remaining fields hold content. Schema banks
//! keep elements with default content as templates; messages are clones of
//! a template with content filled in.

use crate::error::{BitFormatError, Error, Result};
use crate::smallscii;
use std::fmt;
use std::sync::Arc;

/// Widest integer field, limited by the 5-bit range field.
pub const MAX_INTEGER_WIDTH: u8 = 31;

/// Integer range used when the schema text omits it.
pub const DEFAULT_INTEGER_WIDTH: u8 = 16;

/// Most constants an enum may declare (4-bit count).
pub const MAX_ENUM_CONSTANTS: usize = 15;

/// Longest list (8-bit length).
pub const MAX_LIST_LENGTH: usize = 255;

/// Most keys a fixed map may declare (6-bit count).
pub const MAX_MAP_KEYS: usize = 63;

/// A schema-typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaElement {
    Integer(IntegerElement),
    /// Smallscii text, stored in its normalized (lower-case) form
    Text(String),
    Enum(EnumElement),
    List(ListElement),
    FixedMap(FixedMapElement),
    /// Delta sentinel: identical to the reference
    NoChange,
}

/// Bounded-width integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegerElement {
    range: u8,
    delta_range: u8,
    signed: bool,
    value: i64,
}

impl IntegerElement {
    /// Create an integer schema with value 0.
    ///
    /// # Errors
    /// `Error::TypeMismatch` unless both widths are in `1..=31`.
    pub fn new(range: u8, delta_range: u8, signed: bool) -> Result<Self> {
        for (name, width) in [("range", range), ("delta range", delta_range)] {
            if width == 0 || width > MAX_INTEGER_WIDTH {
                return Err(Error::type_mismatch(format!(
                    "integer {name} {width} outside 1..={MAX_INTEGER_WIDTH}"
                )));
            }
        }
        Ok(Self {
            range,
            delta_range,
            signed,
            value: 0,
        })
    }

    /// Unsigned integer whose delta range equals its range.
    pub fn unsigned(range: u8) -> Result<Self> {
        Self::new(range, range, false)
    }

    /// A delta value: `value` is a difference, bounded only by `delta_range`.
    pub(crate) fn delta_of(template: &IntegerElement, value: i64) -> Self {
        Self { value, ..*template }
    }

    pub fn range(&self) -> u8 {
        self.range
    }

    pub fn delta_range(&self) -> u8 {
        self.delta_range
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn min_value(&self) -> i64 {
        if self.signed {
            -self.max_value()
        } else {
            0
        }
    }

    pub fn max_value(&self) -> i64 {
        let magnitude_bits = if self.signed { self.range - 1 } else { self.range };
        (1i64 << magnitude_bits) - 1
    }

    pub fn fits(&self, value: i64) -> bool {
        (self.min_value()..=self.max_value()).contains(&value)
    }

    /// Set the value, rejecting anything outside the representable range.
    pub fn set_value(&mut self, value: i64) -> Result<()> {
        if !self.fits(value) {
            return Err(Error::type_mismatch(format!(
                "integer value {value} outside {}..={}",
                self.min_value(),
                self.max_value()
            )));
        }
        self.value = value;
        Ok(())
    }

    pub(crate) fn same_shape(&self, other: &IntegerElement) -> bool {
        self.range == other.range
            && self.delta_range == other.delta_range
            && self.signed == other.signed
    }
}

/// One of a fixed, ordered set of named constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumElement {
    constants: Arc<[String]>,
    index: usize,
}

impl EnumElement {
    /// Create an enum holding its first constant.
    ///
    /// Constants are normalized to Smallscii form and must be distinct.
    pub fn new<S: AsRef<str>>(constants: &[S]) -> Result<Self> {
        if constants.is_empty() || constants.len() > MAX_ENUM_CONSTANTS {
            return Err(Error::type_mismatch(format!(
                "enum needs 1..={MAX_ENUM_CONSTANTS} constants, got {}",
                constants.len()
            )));
        }

        let mut normalized: Vec<String> = Vec::with_capacity(constants.len());
        for constant in constants {
            let constant = smallscii::normalize(constant.as_ref())?;
            if normalized.contains(&constant) {
                return Err(Error::type_mismatch(format!(
                    "duplicate enum constant {constant:?}"
                )));
            }
            normalized.push(constant);
        }

        Ok(Self {
            constants: normalized.into(),
            index: 0,
        })
    }

    pub fn constants(&self) -> &[String] {
        &self.constants
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Name of the current constant.
    pub fn value(&self) -> &str {
        &self.constants[self.index]
    }

    /// Bits needed for an index: `ceil(log2(n))`.
    pub fn index_bits(&self) -> usize {
        let n = self.constants.len();
        (usize::BITS - (n - 1).leading_zeros()) as usize
    }

    pub fn set_index(&mut self, index: usize) -> Result<()> {
        if index >= self.constants.len() {
            return Err(Error::type_mismatch(format!(
                "enum index {index} outside 0..{}",
                self.constants.len()
            )));
        }
        self.index = index;
        Ok(())
    }

    /// Select a constant by name (case-insensitive).
    pub fn set(&mut self, name: &str) -> Result<()> {
        let wanted = name.to_ascii_lowercase();
        let index = self
            .constants
            .iter()
            .position(|c| *c == wanted)
            .ok_or_else(|| Error::type_mismatch(format!("{name:?} is not an enum constant")))?;
        self.index = index;
        Ok(())
    }

    pub(crate) fn same_shape(&self, other: &EnumElement) -> bool {
        self.constants == other.constants
    }
}

/// Variable-length list of elements of one type.
#[derive(Debug, Clone, PartialEq)]
pub struct ListElement {
    element_type: Arc<SchemaElement>,
    items: Vec<SchemaElement>,
}

impl ListElement {
    /// Empty list of `element_type`.
    pub fn new(element_type: SchemaElement) -> Result<Self> {
        if matches!(element_type, SchemaElement::NoChange) {
            return Err(Error::type_mismatch("list of NoChange"));
        }
        Ok(Self {
            element_type: Arc::new(element_type),
            items: Vec::new(),
        })
    }

    /// List of `length` default elements.
    pub fn with_length(element_type: SchemaElement, length: usize) -> Result<Self> {
        let mut list = Self::new(element_type)?;
        for _ in 0..length {
            list.push_default()?;
        }
        Ok(list)
    }

    pub(crate) fn from_parts(element_type: Arc<SchemaElement>, items: Vec<SchemaElement>) -> Self {
        Self {
            element_type,
            items,
        }
    }

    pub fn element_type(&self) -> &SchemaElement {
        &self.element_type
    }

    pub(crate) fn element_type_arc(&self) -> &Arc<SchemaElement> {
        &self.element_type
    }

    pub fn items(&self) -> &[SchemaElement] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SchemaElement> {
        self.items.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut SchemaElement> {
        self.items.get_mut(index)
    }

    /// Append an element, which must conform to the element type.
    pub fn push(&mut self, item: SchemaElement) -> Result<()> {
        if self.items.len() >= MAX_LIST_LENGTH {
            return Err(BitFormatError::FieldOverflow {
                field: "list length",
                value: self.items.len() + 1,
                max: MAX_LIST_LENGTH,
            }
            .into());
        }
        if !item.conforms_to(&self.element_type) {
            return Err(Error::type_mismatch(format!(
                "list item {item} does not match element type {}",
                self.element_type.schema_text()
            )));
        }
        self.items.push(item);
        Ok(())
    }

    /// Append a default element and return it for filling in.
    pub fn push_default(&mut self) -> Result<&mut SchemaElement> {
        let item = self.element_type.as_ref().clone();
        self.push(item)?;
        let last = self.items.len() - 1;
        Ok(&mut self.items[last])
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// Fixed, ordered set of keyed fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FixedMapElement {
    fields: Vec<(String, SchemaElement)>,
}

impl FixedMapElement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field. Keys are normalized to Smallscii form and must be unique.
    pub fn insert(&mut self, key: &str, schema: SchemaElement) -> Result<()> {
        let key = smallscii::normalize(key)?;
        if self.fields.iter().any(|(k, _)| *k == key) {
            return Err(Error::type_mismatch(format!("duplicate map key {key:?}")));
        }
        if self.fields.len() >= MAX_MAP_KEYS {
            return Err(BitFormatError::FieldOverflow {
                field: "map key count",
                value: self.fields.len() + 1,
                max: MAX_MAP_KEYS,
            }
            .into());
        }
        if matches!(schema, SchemaElement::NoChange) {
            return Err(Error::type_mismatch("map field of NoChange"));
        }
        self.fields.push((key, schema));
        Ok(())
    }

    pub(crate) fn from_fields(fields: Vec<(String, SchemaElement)>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn fields(&self) -> &[(String, SchemaElement)] {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&SchemaElement> {
        let key = key.to_ascii_lowercase();
        self.fields.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub(crate) fn get_mut(&mut self, key: &str) -> Option<&mut SchemaElement> {
        let key = key.to_ascii_lowercase();
        self.fields
            .iter_mut()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    fn same_keys(&self, other: &FixedMapElement) -> bool {
        self.fields.len() == other.fields.len()
            && self.keys().zip(other.keys()).all(|(a, b)| a == b)
    }
}

/// A value that can be written at a path.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Text(String),
    Element(SchemaElement),
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Int(value)
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Text(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::Text(value)
    }
}

impl From<SchemaElement> for Literal {
    fn from(value: SchemaElement) -> Self {
        Literal::Element(value)
    }
}

impl SchemaElement {
    /// Integer schema; see [`IntegerElement::new`].
    pub fn integer(range: u8, delta_range: u8, signed: bool) -> Result<Self> {
        Ok(SchemaElement::Integer(IntegerElement::new(
            range,
            delta_range,
            signed,
        )?))
    }

    /// Text holding `value`.
    pub fn text(value: &str) -> Result<Self> {
        Ok(SchemaElement::Text(smallscii::normalize(value)?))
    }

    pub fn enumeration<S: AsRef<str>>(constants: &[S]) -> Result<Self> {
        Ok(SchemaElement::Enum(EnumElement::new(constants)?))
    }

    pub fn list(element_type: SchemaElement) -> Result<Self> {
        Ok(SchemaElement::List(ListElement::new(element_type)?))
    }

    /// Fixed map from `(key, schema)` pairs, in order.
    pub fn fixed_map<'a, I>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, SchemaElement)>,
    {
        let mut map = FixedMapElement::new();
        for (key, schema) in fields {
            map.insert(key, schema)?;
        }
        Ok(SchemaElement::FixedMap(map))
    }

    pub fn is_no_change(&self) -> bool {
        matches!(self, SchemaElement::NoChange)
    }

    /// Variant name, for messages.
    pub fn kind(&self) -> &'static str {
        match self {
            SchemaElement::Integer(_) => "Integer",
            SchemaElement::Text(_) => "Smallscii",
            SchemaElement::Enum(_) => "Enum",
            SchemaElement::List(_) => "List",
            SchemaElement::FixedMap(_) => "FixedMap",
            SchemaElement::NoChange => "NoChange",
        }
    }

    /// True if both elements describe the same schema, ignoring content.
    pub fn same_shape(&self, other: &SchemaElement) -> bool {
        use SchemaElement::*;
        match (self, other) {
            (Integer(a), Integer(b)) => a.same_shape(b),
            (Text(_), Text(_)) => true,
            (Enum(a), Enum(b)) => a.same_shape(b),
            (List(a), List(b)) => a.element_type.same_shape(&b.element_type),
            (FixedMap(a), FixedMap(b)) => {
                a.same_keys(b)
                    && a.fields
                        .iter()
                        .zip(&b.fields)
                        .all(|((_, x), (_, y))| x.same_shape(y))
            }
            (NoChange, NoChange) => true,
            _ => false,
        }
    }

    /// True if this value has the shape of `schema` all the way down,
    /// including every list item, with content inside its declared range.
    pub fn conforms_to(&self, schema: &SchemaElement) -> bool {
        use SchemaElement::*;
        match (self, schema) {
            (Integer(v), Integer(s)) => v.same_shape(s) && v.fits(v.value),
            (Text(_), Text(_)) => true,
            (Enum(v), Enum(s)) => v.same_shape(s) && v.index < v.constants.len(),
            (List(v), List(s)) => {
                v.element_type.same_shape(&s.element_type)
                    && v.items.len() <= MAX_LIST_LENGTH
                    && v.items.iter().all(|item| item.conforms_to(&s.element_type))
            }
            (FixedMap(v), FixedMap(s)) => {
                v.same_keys(s)
                    && v.fields
                        .iter()
                        .zip(&s.fields)
                        .all(|((_, x), (_, y))| x.conforms_to(y))
            }
            _ => false,
        }
    }

    /// Overwrite this element's content with `literal`.
    pub fn assign(&mut self, literal: Literal) -> Result<()> {
        match (self, literal) {
            (SchemaElement::Integer(int), Literal::Int(value)) => int.set_value(value),
            (SchemaElement::Text(text), Literal::Text(value)) => {
                *text = smallscii::normalize(&value)?;
                Ok(())
            }
            (SchemaElement::Enum(e), Literal::Text(value)) => e.set(&value),
            (target, Literal::Element(value)) => {
                if !value.conforms_to(target) {
                    return Err(Error::type_mismatch(format!(
                        "cannot assign {} value to {}",
                        value.kind(),
                        target.schema_text()
                    )));
                }
                *target = value;
                Ok(())
            }
            (target, literal) => Err(Error::type_mismatch(format!(
                "cannot assign {literal:?} to {}",
                target.kind()
            ))),
        }
    }
}

/// Renders content in the message text grammar.
impl fmt::Display for SchemaElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaElement::Integer(int) => write!(f, "{}", int.value),
            SchemaElement::Text(text) => write!(f, "\"{text}\""),
            SchemaElement::Enum(e) => write!(f, "\"{}\"", e.value()),
            SchemaElement::List(list) => {
                f.write_str("[")?;
                for (i, item) in list.items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            SchemaElement::FixedMap(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "\"{key}\": {value}")?;
                }
                f.write_str("}")
            }
            SchemaElement::NoChange => f.write_str("NoChange"),
        }
    }
}
