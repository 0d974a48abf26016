//! Parsed accessor paths into message values.
//!
//! A path is a sequence of steps written as bracketed keys or indices
//! (`[readings][2][temp]`), dotted field names (`readings.2.temp`), or a
//! mix of both. Quoted bracket contents (`["2"]`) are always map keys.

use super::element::{Literal, SchemaElement};
use crate::error::{Error, ReadError, Result};
use std::fmt;
use std::str::FromStr;

/// One step of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    Key(String),
    Index(usize),
}

impl PathStep {
    fn from_raw(raw: &str) -> PathStep {
        match raw.parse::<usize>() {
            Ok(index) => PathStep::Index(index),
            Err(_) => PathStep::Key(raw.to_string()),
        }
    }
}

/// A parsed sequence of steps.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Path {
    steps: Vec<PathStep>,
}

impl Path {
    pub fn new(steps: Vec<PathStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl FromStr for Path {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let chars: Vec<char> = text.chars().collect();
        let mut steps = Vec::new();
        let mut pos = 0;

        while pos < chars.len() {
            match chars[pos] {
                '[' => {
                    let close = chars[pos..]
                        .iter()
                        .position(|&c| c == ']')
                        .map(|offset| pos + offset)
                        .ok_or_else(|| ReadError::syntax(pos, "unclosed '['"))?;
                    let inner: String = chars[pos + 1..close].iter().collect();
                    let inner = inner.trim();
                    if inner.is_empty() {
                        return Err(ReadError::syntax(pos, "empty path step").into());
                    }
                    let step = match inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
                        Some(quoted) => PathStep::Key(quoted.to_string()),
                        None => PathStep::from_raw(inner),
                    };
                    steps.push(step);
                    pos = close + 1;
                }
                ']' => return Err(ReadError::syntax(pos, "unbalanced ']'").into()),
                '.' => {
                    if pos + 1 >= chars.len() || matches!(chars[pos + 1], '.' | '[' | ']') {
                        return Err(ReadError::syntax(pos, "expected field name after '.'").into());
                    }
                    pos += 1;
                }
                _ => {
                    let end = chars[pos..]
                        .iter()
                        .position(|&c| matches!(c, '.' | '[' | ']'))
                        .map_or(chars.len(), |offset| pos + offset);
                    let raw: String = chars[pos..end].iter().collect();
                    steps.push(PathStep::from_raw(raw.trim()));
                    pos = end;
                }
            }
        }

        Ok(Path { steps })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            match step {
                PathStep::Key(key) => write!(f, "[{key}]")?,
                PathStep::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

fn no_such(step: &PathStep, element: &SchemaElement) -> Error {
    Error::type_mismatch(format!("no element at {step:?} in {}", element.kind()))
}

impl SchemaElement {
    /// Element at `path`.
    ///
    /// # Errors
    /// `Error::TypeMismatch` if a step names a missing key or index, or
    /// steps into a scalar.
    pub fn lookup(&self, path: &Path) -> Result<&SchemaElement> {
        let mut current = self;
        for step in path.steps() {
            current = match (current, step) {
                (SchemaElement::FixedMap(map), PathStep::Key(key)) => map.get(key),
                (SchemaElement::FixedMap(map), PathStep::Index(index)) => {
                    map.get(&index.to_string())
                }
                (SchemaElement::List(list), PathStep::Index(index)) => list.get(*index),
                _ => None,
            }
            .ok_or_else(|| no_such(step, current))?;
        }
        Ok(current)
    }

    /// The element a write to `path` would land on, without changing
    /// anything. A list index equal to the list's length resolves to the
    /// list's element type.
    fn write_target(&self, path: &Path) -> Result<&SchemaElement> {
        let mut current = self;
        for step in path.steps() {
            current = match (current, step) {
                (SchemaElement::FixedMap(map), PathStep::Key(key)) => map.get(key),
                (SchemaElement::FixedMap(map), PathStep::Index(index)) => {
                    map.get(&index.to_string())
                }
                (SchemaElement::List(list), PathStep::Index(index)) if *index == list.len() => {
                    Some(list.element_type())
                }
                (SchemaElement::List(list), PathStep::Index(index)) => list.get(*index),
                _ => None,
            }
            .ok_or_else(|| no_such(step, current))?;
        }
        Ok(current)
    }

    /// Mutable element at `path`.
    ///
    /// A list index equal to the list's length appends a default element, so
    /// messages can be built up one item at a time. The whole path is checked
    /// first; on error nothing has been appended.
    pub fn lookup_mut(&mut self, path: &Path) -> Result<&mut SchemaElement> {
        self.write_target(path)?;
        let mut current = self;
        for step in path.steps() {
            current = match (current, step) {
                (SchemaElement::FixedMap(map), PathStep::Key(key)) => {
                    map.get_mut(key).ok_or_else(|| {
                        Error::type_mismatch(format!("no key {key:?} in FixedMap"))
                    })?
                }
                (SchemaElement::FixedMap(map), PathStep::Index(index)) => {
                    map.get_mut(&index.to_string()).ok_or_else(|| {
                        Error::type_mismatch(format!("no key \"{index}\" in FixedMap"))
                    })?
                }
                (SchemaElement::List(list), PathStep::Index(index)) => {
                    if *index == list.len() {
                        list.push_default()?
                    } else {
                        let len = list.len();
                        list.get_mut(*index).ok_or_else(|| {
                            Error::type_mismatch(format!("index {index} beyond list of {len}"))
                        })?
                    }
                }
                (other, step) => return Err(no_such(step, other)),
            };
        }
        Ok(current)
    }

    /// Parse `path` and return the element there.
    pub fn get(&self, path: &str) -> Result<&SchemaElement> {
        self.lookup(&path.parse()?)
    }

    /// Parse `path` and assign `value` to the element there.
    pub fn set(&mut self, path: &str, value: impl Into<Literal>) -> Result<()> {
        let path: Path = path.parse()?;
        let mut updated = self.write_target(&path)?.clone();
        updated.assign(value.into())?;
        *self.lookup_mut(&path)? = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station() -> SchemaElement {
        SchemaElement::parse_schema(
            r#"FixedMap { "name": Smallscii,
                          "readings": List [ FixedMap { "temp": Integer*(8), "state": Enum { "ok", "fault" } } ] }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_bracket_and_dotted() {
        let expected = Path::new(vec![
            PathStep::Key("readings".into()),
            PathStep::Index(2),
            PathStep::Key("temp".into()),
        ]);
        assert_eq!("[readings][2][temp]".parse::<Path>().unwrap(), expected);
        assert_eq!("readings.2.temp".parse::<Path>().unwrap(), expected);
        assert_eq!("readings[2].temp".parse::<Path>().unwrap(), expected);
        assert_eq!(
            "[\"2\"]".parse::<Path>().unwrap().steps(),
            &[PathStep::Key("2".into())]
        );
        assert!("".parse::<Path>().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_paths() {
        for bad in ["[readings", "readings]", "[]", "a..b", "a."] {
            assert!(
                matches!(bad.parse::<Path>(), Err(Error::Read(ReadError::Syntax { .. }))),
                "{bad} should not parse"
            );
        }
    }

    #[test]
    fn test_set_builds_message() {
        let mut msg = station();
        msg.set("[name]", "North").unwrap();
        msg.set("[readings][0][temp]", -12i64).unwrap();
        msg.set("[readings][0][state]", "fault").unwrap();
        msg.set("[readings][1][temp]", 30i64).unwrap();

        assert_eq!(msg.get("name").unwrap(), &SchemaElement::Text("north".into()));
        assert_eq!(msg.get("readings[1].state").unwrap().to_string(), "\"ok\"");
        assert_eq!(
            msg.to_string(),
            r#"{"name": "north", "readings": [{"temp": -12, "state": "fault"}, {"temp": 30, "state": "ok"}]}"#
        );
    }

    #[test]
    fn test_missing_steps_are_type_mismatch() {
        let mut msg = station();
        assert!(matches!(msg.get("[nope]"), Err(Error::TypeMismatch(_))));
        assert!(matches!(msg.get("[readings][0]"), Err(Error::TypeMismatch(_))));
        assert!(matches!(msg.set("[readings][3][temp]", 1i64), Err(Error::TypeMismatch(_))));
        assert!(matches!(msg.set("[name][0]", 1i64), Err(Error::TypeMismatch(_))));
        assert!(matches!(msg.set("[readings][0][temp]", 500i64), Err(Error::TypeMismatch(_))));
    }

    #[test]
    fn test_failed_set_leaves_message_unchanged() {
        let mut msg = station();
        let before = msg.clone();

        assert!(msg.set("[readings][0][nokey]", 1i64).is_err());
        assert!(msg.set("[readings][0][temp]", 500i64).is_err());
        assert!(msg.set("[readings][0][state]", "unknown").is_err());
        assert_eq!(msg, before);
        assert!(matches!(
            msg.lookup_mut(&"[readings][0][nokey]".parse().unwrap()),
            Err(Error::TypeMismatch(_))
        ));
        assert_eq!(msg, before);

        // A good write still appends.
        msg.set("[readings][0][temp]", 5i64).unwrap();
        assert_eq!(msg.get("readings[0].temp").unwrap().to_string(), "5");
    }

    #[test]
    fn test_display_round_trips() {
        let path: Path = "a.b[3]".parse().unwrap();
        assert_eq!(path.to_string(), "[a][b][3]");
        assert_eq!(path.to_string().parse::<Path>().unwrap(), path);
    }
}
