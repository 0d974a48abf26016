//! Textual grammars for schemas and messages.
//!
//! Schema grammar:
//! ```text
//! schema  := "FixedMap" "{" [ key ":" schema { "," key ":" schema } ] "}"
//!          | "List" "[" schema "]"
//!          | "Integer" [ "*" ] [ "(" range [ "," delta_range ] ")" ]
//!          | "Enum" "{" name { "," name } "}"
//!          | "Smallscii"
//! key     := quoted | bare word
//! ```
//! `Integer*` is signed. Keywords are case-insensitive.
//!
//! Message grammar mirrors the schema: `{ "key": value, ... }` for maps
//! (keys in any order, missing keys keep their default), `[v1, v2]` for
//! lists, decimal integers, and quoted strings for text and enum constants.

use super::element::{FixedMapElement, IntegerElement, Literal, SchemaElement, DEFAULT_INTEGER_WIDTH};
use crate::error::{Error, ReadError, Result};

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        ReadError::syntax(self.pos, message).into()
    }

    /// Consume `c` (after whitespace) if it is next.
    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.eat(c) {
            Ok(())
        } else {
            match self.peek() {
                Some(found) => Err(self.error(format!("expected '{c}', found '{found}'"))),
                None => Err(self.error(format!("expected '{c}', found end of input"))),
            }
        }
    }

    fn word(&mut self) -> Result<&'a str> {
        self.skip_ws();
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.bump();
        }
        if start == self.pos {
            return Err(self.error("expected a word"));
        }
        Ok(&self.src[start..self.pos])
    }

    fn quoted(&mut self) -> Result<String> {
        self.expect('"')?;
        let start = self.pos;
        let len = self
            .rest()
            .find('"')
            .ok_or_else(|| self.error("unterminated string"))?;
        self.pos += len + 1;
        Ok(self.src[start..start + len].to_string())
    }

    /// Quoted string, or a bare word.
    fn name(&mut self) -> Result<String> {
        self.skip_ws();
        if self.peek() == Some('"') {
            self.quoted()
        } else {
            Ok(self.word()?.to_string())
        }
    }

    fn integer(&mut self) -> Result<i64> {
        self.skip_ws();
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        self.src[start..self.pos]
            .parse()
            .map_err(|_| ReadError::syntax(start, "expected an integer").into())
    }

    fn width(&mut self) -> Result<u8> {
        let start = self.pos;
        let value = self.integer()?;
        u8::try_from(value).map_err(|_| ReadError::syntax(start, "integer width out of range").into())
    }

    /// Comma-separated items up to `close`, which is consumed.
    fn delimited<F>(&mut self, close: char, mut item: F) -> Result<()>
    where
        F: FnMut(&mut Self) -> Result<()>,
    {
        if self.eat(close) {
            return Ok(());
        }
        loop {
            item(self)?;
            if self.eat(close) {
                return Ok(());
            }
            self.expect(',')?;
        }
    }

    fn schema(&mut self) -> Result<SchemaElement> {
        let keyword = self.word()?.to_ascii_lowercase();
        match keyword.as_str() {
            "fixedmap" => {
                self.expect('{')?;
                let mut map = FixedMapElement::new();
                self.delimited('}', |p| {
                    let key = p.name()?;
                    p.expect(':')?;
                    let schema = p.schema()?;
                    map.insert(&key, schema)
                })?;
                Ok(SchemaElement::FixedMap(map))
            }
            "list" => {
                self.expect('[')?;
                let element_type = self.schema()?;
                self.expect(']')?;
                SchemaElement::list(element_type)
            }
            "integer" => {
                let signed = self.eat('*');
                let (mut range, mut delta_range) = (DEFAULT_INTEGER_WIDTH, None);
                if self.eat('(') {
                    range = self.width()?;
                    if self.eat(',') {
                        delta_range = Some(self.width()?);
                    }
                    self.expect(')')?;
                }
                Ok(SchemaElement::Integer(IntegerElement::new(
                    range,
                    delta_range.unwrap_or(range),
                    signed,
                )?))
            }
            "enum" => {
                self.expect('{')?;
                let mut constants = Vec::new();
                self.delimited('}', |p| {
                    constants.push(p.name()?);
                    Ok(())
                })?;
                SchemaElement::enumeration(&constants)
            }
            "smallscii" => Ok(SchemaElement::Text(String::new())),
            other => Err(self.error(format!("unknown schema type {other:?}"))),
        }
    }

    fn content(&mut self, schema: &SchemaElement) -> Result<SchemaElement> {
        match schema {
            SchemaElement::Integer(_) => {
                let mut value = schema.clone();
                value.assign(Literal::Int(self.integer()?))?;
                Ok(value)
            }
            SchemaElement::Text(_) | SchemaElement::Enum(_) => {
                let mut value = schema.clone();
                value.assign(Literal::Text(self.name()?))?;
                Ok(value)
            }
            SchemaElement::List(template) => {
                self.expect('[')?;
                let mut list = template.clone();
                list.clear();
                self.delimited(']', |p| list.push(p.content(template.element_type())?))?;
                Ok(SchemaElement::List(list))
            }
            SchemaElement::FixedMap(template) => {
                self.expect('{')?;
                let mut map = template.clone();
                self.delimited('}', |p| {
                    let key = p.name()?;
                    p.expect(':')?;
                    let field_schema = template
                        .get(&key)
                        .ok_or_else(|| Error::type_mismatch(format!("no key {key:?} in schema")))?;
                    let value = p.content(field_schema)?;
                    if let Some(slot) = map.get_mut(&key) {
                        *slot = value;
                    }
                    Ok(())
                })?;
                Ok(SchemaElement::FixedMap(map))
            }
            SchemaElement::NoChange => Err(Error::type_mismatch("NoChange has no content")),
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.skip_ws();
        if self.pos < self.src.len() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(())
    }
}

/// Parse one schema off the front of `text`, returning it and the remainder.
pub fn parse_schema_text(text: &str) -> Result<(SchemaElement, &str)> {
    let mut parser = Parser::new(text);
    let schema = parser.schema()?;
    Ok((schema, parser.rest()))
}

impl SchemaElement {
    /// Parse a complete schema; trailing non-whitespace is an error.
    pub fn parse_schema(text: &str) -> Result<SchemaElement> {
        let mut parser = Parser::new(text);
        let schema = parser.schema()?;
        parser.finish()?;
        Ok(schema)
    }

    /// Parse message text into a new value shaped like `self`.
    pub fn parse_content(&self, text: &str) -> Result<SchemaElement> {
        let mut parser = Parser::new(text);
        let value = parser.content(self)?;
        parser.finish()?;
        Ok(value)
    }

    /// Render the schema in the textual grammar.
    pub fn schema_text(&self) -> String {
        match self {
            SchemaElement::Integer(int) => format!(
                "Integer{}({},{})",
                if int.is_signed() { "*" } else { "" },
                int.range(),
                int.delta_range()
            ),
            SchemaElement::Text(_) => "Smallscii".to_string(),
            SchemaElement::Enum(e) => {
                let constants: Vec<String> =
                    e.constants().iter().map(|c| format!("\"{c}\"")).collect();
                format!("Enum {{ {} }}", constants.join(", "))
            }
            SchemaElement::List(list) => format!("List [ {} ]", list.element_type().schema_text()),
            SchemaElement::FixedMap(map) => {
                let fields: Vec<String> = map
                    .fields()
                    .iter()
                    .map(|(key, schema)| format!("\"{key}\" : {}", schema.schema_text()))
                    .collect();
                format!("FixedMap {{ {} }}", fields.join(", "))
            }
            SchemaElement::NoChange => "NoChange".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READING: &str = r#"FixedMap { "name" : Smallscii, "value" : Integer(8) }"#;

    #[test]
    fn test_parse_schema() {
        let schema = SchemaElement::parse_schema(READING).unwrap();
        let expected = SchemaElement::fixed_map([
            ("name", SchemaElement::text("").unwrap()),
            ("value", SchemaElement::integer(8, 8, false).unwrap()),
        ])
        .unwrap();
        assert_eq!(schema, expected);
    }

    #[test]
    fn test_integer_forms() {
        let parse = |t: &str| match SchemaElement::parse_schema(t).unwrap() {
            SchemaElement::Integer(i) => (i.range(), i.delta_range(), i.is_signed()),
            other => panic!("not an integer: {other:?}"),
        };
        assert_eq!(parse("Integer"), (16, 16, false));
        assert_eq!(parse("Integer(12)"), (12, 12, false));
        assert_eq!(parse("Integer(12, 4)"), (12, 4, false));
        assert_eq!(parse("Integer*(6,3)"), (6, 3, true));
        assert_eq!(parse("integer * ( 6 )"), (6, 6, true));
        assert!(SchemaElement::parse_schema("Integer(0)").is_err());
        assert!(SchemaElement::parse_schema("Integer(40)").is_err());
        assert!(SchemaElement::parse_schema("Integer(-3)").is_err());
    }

    #[test]
    fn test_remainder_returned() {
        let (schema, rest) = parse_schema_text("Smallscii, Integer(3)").unwrap();
        assert_eq!(schema, SchemaElement::Text(String::new()));
        assert_eq!(rest, ", Integer(3)");
        assert!(SchemaElement::parse_schema("Smallscii, Integer(3)").is_err());
    }

    #[test]
    fn test_unbalanced_delimiters() {
        for bad in [
            "FixedMap { \"a\" : Smallscii",
            "FixedMap { \"a\" : Smallscii ]",
            "List [ Smallscii }",
            "List [ Smallscii",
            "Integer(4",
            "Enum { \"a\", \"b\" ",
            "Enum { \"a\" \"b\" }",
            "Widget",
        ] {
            assert!(
                matches!(SchemaElement::parse_schema(bad), Err(Error::Read(ReadError::Syntax { .. }))),
                "{bad:?} should be a syntax error"
            );
        }
    }

    #[test]
    fn test_schema_text_round_trip() {
        let text = r#"FixedMap { "id" : Integer(10,4), "mode" : Enum { "auto", "manual" },
                       "log" : List [ FixedMap { "t" : Integer*(12,6), "msg" : Smallscii } ] }"#;
        let schema = SchemaElement::parse_schema(text).unwrap();
        let rendered = schema.schema_text();
        assert_eq!(
            rendered,
            r#"FixedMap { "id" : Integer(10,4), "mode" : Enum { "auto", "manual" }, "log" : List [ FixedMap { "t" : Integer*(12,6), "msg" : Smallscii } ] }"#
        );
        assert_eq!(SchemaElement::parse_schema(&rendered).unwrap(), schema);
    }

    #[test]
    fn test_parse_message() {
        let schema = SchemaElement::parse_schema(READING).unwrap();
        let msg = schema.parse_content(r#"{ "value": 10, "name": "ABC" }"#).unwrap();
        assert_eq!(msg.get("name").unwrap(), &SchemaElement::Text("abc".into()));
        assert_eq!(msg.to_string(), r#"{"name": "abc", "value": 10}"#);
        assert_eq!(schema.parse_content(&msg.to_string()).unwrap(), msg);

        // Missing keys keep their defaults.
        let partial = schema.parse_content(r#"{"value": 3}"#).unwrap();
        assert_eq!(partial.to_string(), r#"{"name": "", "value": 3}"#);
    }

    #[test]
    fn test_parse_message_errors() {
        let schema = SchemaElement::parse_schema(READING).unwrap();
        assert!(matches!(
            schema.parse_content(r#"{"colour": 1}"#),
            Err(Error::TypeMismatch(_))
        ));
        assert!(matches!(
            schema.parse_content(r#"{"value": 256}"#),
            Err(Error::TypeMismatch(_))
        ));
        assert!(matches!(
            schema.parse_content(r#"{"value": 1"#),
            Err(Error::Read(ReadError::Syntax { .. }))
        ));
        assert!(matches!(
            schema.parse_content(r#"{"name": "abc}"#),
            Err(Error::Read(ReadError::Syntax { .. }))
        ));
    }

    #[test]
    fn test_parse_list_message() {
        let schema = SchemaElement::parse_schema("List [ Enum { on, off } ]").unwrap();
        let msg = schema.parse_content(r#"["off", "on", "off"]"#).unwrap();
        let SchemaElement::List(list) = &msg else {
            panic!("expected list");
        };
        assert_eq!(list.len(), 3);
        assert_eq!(msg.to_string(), r#"["off", "on", "off"]"#);
        assert_eq!(schema.parse_content("[]").unwrap().to_string(), "[]");
        assert!(schema.parse_content(r#"["up"]"#).is_err());
    }
}
