//! Structural differences between values of one schema.
//!
//! `diff(reference, candidate)` keeps only what changed: unchanged leaves
//! become NoChange, and a list or map whose children are all unchanged
//! collapses to a single NoChange. Integer deltas hold the signed
//! difference. `patch` is the inverse.

use super::element::{FixedMapElement, IntegerElement, ListElement, SchemaElement};
use crate::error::{Error, ReadError, Result};
use std::sync::Arc;

impl SchemaElement {
    /// Difference from `self` (the reference) to `candidate`.
    ///
    /// # Errors
    /// - `Error::TypeMismatch` if the two values have different schemas
    /// - `Error::CannotComputeDelta` if two lists differ in length
    pub fn diff(&self, candidate: &SchemaElement) -> Result<SchemaElement> {
        use SchemaElement::*;
        match (self, candidate) {
            (Integer(reference), Integer(new)) => {
                if !reference.same_shape(new) {
                    return Err(mismatch(self, candidate));
                }
                if reference.value() == new.value() {
                    return Ok(NoChange);
                }
                let difference = new.value() - reference.value();
                Ok(Integer(IntegerElement::delta_of(reference, difference)))
            }
            (Text(reference), Text(new)) => Ok(if reference == new {
                NoChange
            } else {
                candidate.clone()
            }),
            (Enum(reference), Enum(new)) => {
                if !reference.same_shape(new) {
                    return Err(mismatch(self, candidate));
                }
                Ok(if reference.index() == new.index() {
                    NoChange
                } else {
                    candidate.clone()
                })
            }
            (List(reference), List(new)) => {
                if !reference.element_type().same_shape(new.element_type()) {
                    return Err(mismatch(self, candidate));
                }
                if reference.len() != new.len() {
                    return Err(Error::cannot_delta(format!(
                        "list length changed from {} to {}",
                        reference.len(),
                        new.len()
                    )));
                }
                let items = reference
                    .items()
                    .iter()
                    .zip(new.items())
                    .map(|(r, n)| r.diff(n))
                    .collect::<Result<Vec<_>>>()?;
                if items.iter().all(SchemaElement::is_no_change) {
                    return Ok(NoChange);
                }
                Ok(List(ListElement::from_parts(
                    Arc::clone(reference.element_type_arc()),
                    items,
                )))
            }
            (FixedMap(reference), FixedMap(new)) => {
                if !reference.keys().eq(new.keys()) {
                    return Err(mismatch(self, candidate));
                }
                let fields = reference
                    .fields()
                    .iter()
                    .zip(new.fields())
                    .map(|((key, r), (_, n))| Ok((key.clone(), r.diff(n)?)))
                    .collect::<Result<Vec<_>>>()?;
                if fields.iter().all(|(_, value)| value.is_no_change()) {
                    return Ok(NoChange);
                }
                Ok(FixedMap(FixedMapElement::from_fields(fields)))
            }
            _ => Err(mismatch(self, candidate)),
        }
    }

    /// Apply `delta` to `self` (the reference), producing the new value.
    ///
    /// # Errors
    /// `ReadError::DeltaMismatch` if the delta does not line up with the
    /// reference, or an integer result leaves the reference's range.
    pub fn patch(&self, delta: &SchemaElement) -> Result<SchemaElement> {
        use SchemaElement::*;
        match (self, delta) {
            (NoChange, _) => Err(delta_mismatch("reference is NoChange")),
            (_, NoChange) => Ok(self.clone()),
            (Integer(reference), Integer(d)) => {
                if !reference.same_shape(d) {
                    return Err(delta_mismatch("integer widths differ"));
                }
                let value = reference
                    .value()
                    .checked_add(d.value())
                    .ok_or_else(|| delta_mismatch("integer overflow"))?;
                let mut patched = *reference;
                patched.set_value(value).map_err(|_| {
                    delta_mismatch(format!(
                        "{} + {} leaves the integer range",
                        reference.value(),
                        d.value()
                    ))
                })?;
                Ok(Integer(patched))
            }
            (Text(_), Text(_)) => Ok(delta.clone()),
            (Enum(reference), Enum(d)) => {
                if !reference.same_shape(d) {
                    return Err(delta_mismatch("enum constants differ"));
                }
                Ok(delta.clone())
            }
            (List(reference), List(d)) => {
                if reference.len() != d.len() {
                    return Err(delta_mismatch(format!(
                        "list delta has {} items, reference has {}",
                        d.len(),
                        reference.len()
                    )));
                }
                let items = reference
                    .items()
                    .iter()
                    .zip(d.items())
                    .map(|(r, d)| r.patch(d))
                    .collect::<Result<Vec<_>>>()?;
                Ok(List(ListElement::from_parts(
                    Arc::clone(reference.element_type_arc()),
                    items,
                )))
            }
            (FixedMap(reference), FixedMap(d)) => {
                if !reference.keys().eq(d.keys()) {
                    return Err(delta_mismatch("map keys differ"));
                }
                let fields = reference
                    .fields()
                    .iter()
                    .zip(d.fields())
                    .map(|((key, r), (_, d))| Ok((key.clone(), r.patch(d)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(FixedMap(FixedMapElement::from_fields(fields)))
            }
            _ => Err(delta_mismatch(format!(
                "{} delta for {} reference",
                delta.kind(),
                self.kind()
            ))),
        }
    }
}

fn mismatch(reference: &SchemaElement, candidate: &SchemaElement) -> Error {
    Error::type_mismatch(format!(
        "cannot diff {} against {}",
        candidate.schema_text(),
        reference.schema_text()
    ))
}

fn delta_mismatch(msg: impl Into<String>) -> Error {
    ReadError::DeltaMismatch(msg.into()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::element::Literal;

    fn reading(name: &str, value: i64) -> SchemaElement {
        let mut map = SchemaElement::fixed_map([
            ("name", SchemaElement::text("").unwrap()),
            ("value", SchemaElement::integer(8, 8, false).unwrap()),
        ])
        .unwrap();
        map.set("name", name).unwrap();
        map.set("value", value).unwrap();
        map
    }

    fn int_list(values: &[i64]) -> SchemaElement {
        let mut list = SchemaElement::list(SchemaElement::integer(4, 4, false).unwrap()).unwrap();
        if let SchemaElement::List(l) = &mut list {
            for &v in values {
                l.push_default().unwrap().assign(Literal::Int(v)).unwrap();
            }
        }
        list
    }

    #[test]
    fn test_diff_of_equal_values_is_no_change() {
        let v = reading("abc", 10);
        assert!(v.diff(&v).unwrap().is_no_change());
        assert_eq!(v.patch(&SchemaElement::NoChange).unwrap(), v);
    }

    #[test]
    fn test_integer_delta_is_difference() {
        let reference = reading("abc", 10);
        let new = reading("abc", 12);
        let delta = reference.diff(&new).unwrap();

        let SchemaElement::FixedMap(map) = &delta else {
            panic!("expected map delta, got {delta:?}");
        };
        assert!(map.get("name").unwrap().is_no_change());
        match map.get("value").unwrap() {
            SchemaElement::Integer(d) => assert_eq!(d.value(), 2),
            other => panic!("expected integer delta, got {other:?}"),
        }

        // 1 (map changed) + 0 (name) + 1 + 8-bit signed +2
        let bits = delta.content_bits(true).unwrap();
        assert_eq!(bits.to_string(), "10100000010");

        assert_eq!(reference.patch(&delta).unwrap(), new);
    }

    #[test]
    fn test_negative_integer_delta_on_unsigned() {
        let reference = reading("abc", 200);
        let new = reading("abc", 3);
        let delta = reference.diff(&new).unwrap();
        // -197 needs 8 magnitude bits, more than the 7 an 8-bit delta has.
        assert!(delta.content_bits(true).is_err());
        assert_eq!(reference.patch(&delta).unwrap(), new);
    }

    #[test]
    fn test_list_length_mismatch_cannot_delta() {
        let a = int_list(&[1, 2, 3]);
        let b = int_list(&[1, 2]);
        assert!(matches!(a.diff(&b), Err(Error::CannotComputeDelta(_))));
    }

    #[test]
    fn test_list_delta_marks_unchanged_items() {
        let a = int_list(&[1, 2, 3]);
        let b = int_list(&[1, 5, 3]);
        let delta = a.diff(&b).unwrap();
        let SchemaElement::List(items) = &delta else {
            panic!("expected list delta");
        };
        assert!(items.items()[0].is_no_change());
        assert!(!items.items()[1].is_no_change());
        assert!(items.items()[2].is_no_change());
        assert_eq!(a.patch(&delta).unwrap(), b);
    }

    #[test]
    fn test_type_mismatch() {
        let a = reading("abc", 1);
        let other_map = SchemaElement::fixed_map([
            ("name", SchemaElement::text("").unwrap()),
            ("count", SchemaElement::integer(8, 8, false).unwrap()),
        ])
        .unwrap();
        assert!(matches!(a.diff(&other_map), Err(Error::TypeMismatch(_))));
        assert!(matches!(
            a.diff(&SchemaElement::text("x").unwrap()),
            Err(Error::TypeMismatch(_))
        ));
        assert!(matches!(
            SchemaElement::integer(4, 4, false)
                .unwrap()
                .diff(&SchemaElement::integer(5, 5, false).unwrap()),
            Err(Error::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_patch_rejects_misaligned_delta() {
        let a = int_list(&[1, 2, 3]);
        let delta = int_list(&[1, 2]);
        assert!(matches!(
            a.patch(&delta),
            Err(Error::Read(ReadError::DeltaMismatch(_)))
        ));
        assert!(a.patch(&SchemaElement::text("x").unwrap()).is_err());
    }

    #[test]
    fn test_patch_out_of_range_integer() {
        let reference = reading("abc", 250);
        let mut delta = reference.diff(&reading("abc", 255)).unwrap();
        if let SchemaElement::FixedMap(map) = &mut delta {
            if let Some(SchemaElement::Integer(d)) = map.get_mut("value") {
                *d = IntegerElement::delta_of(d, 10);
            }
        }
        assert!(reference.patch(&delta).is_err());
    }
}
