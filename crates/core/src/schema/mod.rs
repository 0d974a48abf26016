//! The schema-typed codec.
//!
//! - `element`: the `SchemaElement` value types
//! - `codec`: schema and content bit encodings
//! - `delta`: structural diff and patch
//! - `text`: schema and message text grammars
//! - `path`: parsed accessor paths

mod codec;
mod delta;
mod element;
mod path;
mod text;

pub use codec::TAG_BITS;
pub use element::{
    EnumElement, FixedMapElement, IntegerElement, ListElement, Literal, SchemaElement,
    DEFAULT_INTEGER_WIDTH, MAX_ENUM_CONSTANTS, MAX_INTEGER_WIDTH, MAX_LIST_LENGTH, MAX_MAP_KEYS,
};
pub use path::{Path, PathStep};
pub use text::parse_schema_text;

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    const SCHEMA: &str = r#"FixedMap {
        "id"    : Integer(12, 6),
        "temp"  : Integer*(9),
        "mode"  : Enum { "idle", "run", "fault" },
        "label" : Smallscii,
        "trace" : List [ Integer(5) ]
    }"#;

    fn label() -> impl Strategy<Value = String> {
        proptest::collection::vec(proptest::sample::select(b"abcxyz019 .:-".to_vec()), 0..12)
            .prop_map(|chars| chars.into_iter().map(char::from).collect())
    }

    prop_compose! {
        fn message()(
            id in 0i64..4096,
            temp in -255i64..=255,
            mode in prop::sample::select(vec!["idle", "run", "fault"]),
            label in label(),
            trace in proptest::collection::vec(0i64..32, 0..6),
        ) -> SchemaElement {
            let mut msg = SchemaElement::parse_schema(SCHEMA).unwrap();
            msg.set("id", id).unwrap();
            msg.set("temp", temp).unwrap();
            msg.set("mode", mode).unwrap();
            msg.set("label", label).unwrap();
            for (i, v) in trace.into_iter().enumerate() {
                msg.set(&format!("trace[{i}]"), v).unwrap();
            }
            msg
        }
    }

    proptest! {
        #[test]
        fn prop_content_round_trip(msg in message()) {
            let schema = SchemaElement::parse_schema(SCHEMA).unwrap();
            let bits = msg.content_bits(false).unwrap();
            prop_assert_eq!(schema.decode_content_exact(bits, false).unwrap(), msg);
        }

        #[test]
        fn prop_patch_inverts_diff(reference in message(), candidate in message()) {
            match reference.diff(&candidate) {
                Ok(delta) => {
                    prop_assert_eq!(reference.patch(&delta).unwrap(), candidate);
                }
                Err(e) => {
                    // Only differing trace lengths prevent a delta.
                    prop_assert!(matches!(e, crate::Error::CannotComputeDelta(_)));
                }
            }
        }

        #[test]
        fn prop_diff_of_self_is_no_change(msg in message()) {
            prop_assert!(msg.diff(&msg).unwrap().is_no_change());
        }

        #[test]
        fn prop_delta_bits_round_trip(reference in message(), candidate in message()) {
            let schema = SchemaElement::parse_schema(SCHEMA).unwrap();
            if let Ok(delta) = reference.diff(&candidate) {
                if let Ok(bits) = delta.content_bits(true) {
                    let decoded = schema.decode_content_exact(bits, true).unwrap();
                    prop_assert_eq!(reference.patch(&decoded).unwrap(), candidate);
                }
            }
        }

        #[test]
        fn prop_display_parses_back(msg in message()) {
            let schema = SchemaElement::parse_schema(SCHEMA).unwrap();
            prop_assert_eq!(schema.parse_content(&msg.to_string()).unwrap(), msg);
        }
    }
}
