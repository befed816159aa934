//! Path expression engine.
//!
//! Grammar (see the schema DSL docs):
//!
//! ```text
//! path    := '$' segment*
//! segment := '.' identifier | '[' wildcard_or_index ']' | '..' identifier
//! ```
//!
//! `$.a.b` descends, `$.a[*].b` maps over an array, `$..x` performs recursive
//! descent. Expressions compile once into a [`PathExpr`] and evaluate against
//! a JSON tree, yielding a list of leaf values. Missing keys yield the empty
//! list, never an error.

use crate::errors::PathParseError;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1},
    combinator::{all_consuming, map, map_res, verify},
    multi::many0,
    sequence::{delimited, preceded},
    IResult,
};
use serde::{Serialize, Serializer};
use serde_json::Value;

/// One step of a compiled path expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// `.name`: object member access
    Child(String),
    /// `..name`: recursive descent to every member with this name
    Descendant(String),
    /// `[n]`: array element access
    Index(usize),
    /// `[*]`: map over all array elements
    Wildcard,
}

/// A compiled path expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    raw: String,
    segments: Vec<Segment>,
}

// Schema normalization serializes compiled mappings; the textual form is the
// canonical representation.
impl Serialize for PathExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

fn identifier(input: &str) -> IResult<&str, &str> {
    verify(
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_'),
        |s: &str| !s.starts_with(|c: char| c.is_ascii_digit()),
    )(input)
}

fn segment(input: &str) -> IResult<&str, Segment> {
    alt((
        map(preceded(tag(".."), identifier), |id: &str| {
            Segment::Descendant(id.to_string())
        }),
        map(preceded(char('.'), identifier), |id: &str| {
            Segment::Child(id.to_string())
        }),
        delimited(
            char('['),
            alt((
                map(char('*'), |_| Segment::Wildcard),
                map_res(digit1, |d: &str| d.parse::<usize>().map(Segment::Index)),
            )),
            char(']'),
        ),
    ))(input)
}

fn path(input: &str) -> IResult<&str, Vec<Segment>> {
    all_consuming(preceded(char('$'), many0(segment)))(input)
}

impl PathExpr {
    /// Compile a path expression, rejecting anything outside the grammar
    pub fn parse(expr: &str) -> Result<Self, PathParseError> {
        match path(expr) {
            Ok((_, segments)) => Ok(Self {
                raw: expr.to_string(),
                segments,
            }),
            Err(_) => Err(PathParseError {
                expr: expr.to_string(),
                reason: "expected '$' followed by '.name', '..name', '[n]' or '[*]' segments"
                    .to_string(),
            }),
        }
    }

    /// The textual form this expression was compiled from
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Evaluate against a document, returning all selected leaf values.
    /// Selected arrays flatten into their elements.
    pub fn evaluate<'a>(&self, doc: &'a Value) -> Vec<&'a Value> {
        let mut current: Vec<&Value> = vec![doc];
        for segment in &self.segments {
            let mut next = Vec::new();
            match segment {
                Segment::Child(name) => {
                    for value in current {
                        if let Value::Object(map) = value {
                            if let Some(child) = map.get(name) {
                                next.push(child);
                            }
                        }
                    }
                }
                Segment::Index(index) => {
                    for value in current {
                        if let Value::Array(items) = value {
                            if let Some(child) = items.get(*index) {
                                next.push(child);
                            }
                        }
                    }
                }
                Segment::Wildcard => {
                    for value in current {
                        if let Value::Array(items) = value {
                            next.extend(items.iter());
                        }
                    }
                }
                Segment::Descendant(name) => {
                    for value in current {
                        collect_descendants(value, name, &mut next);
                    }
                }
            }
            if next.is_empty() {
                return Vec::new();
            }
            current = next;
        }

        let mut leaves = Vec::new();
        for value in current {
            flatten_into(value, &mut leaves);
        }
        leaves
    }

    /// First non-null scalar the expression selects, if any
    pub fn first_scalar(&self, doc: &Value) -> Option<Value> {
        self.evaluate(doc)
            .into_iter()
            .find(|v| matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_)))
            .cloned()
    }
}

impl std::fmt::Display for PathExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

fn flatten_into<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        other => out.push(other),
    }
}

fn collect_descendants<'a>(value: &'a Value, name: &str, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(name) {
                out.push(child);
            }
            for (_, child) in map {
                collect_descendants(child, name, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_descendants(item, name, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_valid_expressions() {
        for expr in ["$", "$.a", "$.a.b", "$.a[*].b", "$.items[0]", "$..email", "$.a_1.b2"] {
            assert!(PathExpr::parse(expr).is_ok(), "should parse: {}", expr);
        }
    }

    #[test]
    fn test_parse_invalid_expressions() {
        for expr in ["", "a.b", "$.", "$..", "$.a[", "$.a[x]", "$.a b", "$[*", "$.1a"] {
            assert!(PathExpr::parse(expr).is_err(), "should reject: {}", expr);
        }
    }

    #[test]
    fn test_descend() {
        let doc = json!({"a": {"b": {"c": 42}}});
        let expr = PathExpr::parse("$.a.b.c").unwrap();
        assert_eq!(expr.evaluate(&doc), vec![&json!(42)]);
    }

    #[test]
    fn test_wildcard_fan_out() {
        let doc = json!({"reviewers": [
            {"email": "a@x", "name": "A"},
            {"email": "b@x", "name": "B"}
        ]});
        let expr = PathExpr::parse("$.reviewers[*].email").unwrap();
        let values = expr.evaluate(&doc);
        assert_eq!(values, vec![&json!("a@x"), &json!("b@x")]);
    }

    #[test]
    fn test_index() {
        let doc = json!({"tags": ["x", "y", "z"]});
        let expr = PathExpr::parse("$.tags[1]").unwrap();
        assert_eq!(expr.evaluate(&doc), vec![&json!("y")]);
    }

    #[test]
    fn test_array_leaf_flattens() {
        let doc = json!({"tags": ["x", "y"]});
        let expr = PathExpr::parse("$.tags").unwrap();
        assert_eq!(expr.evaluate(&doc), vec![&json!("x"), &json!("y")]);
    }

    #[test]
    fn test_recursive_descent() {
        let doc = json!({
            "author": {"email": "a@x"},
            "comments": [{"author": {"email": "b@x"}}, {"email": "c@x"}]
        });
        let expr = PathExpr::parse("$..email").unwrap();
        let values = expr.evaluate(&doc);
        assert_eq!(values.len(), 3);
        assert!(values.contains(&&json!("a@x")));
        assert!(values.contains(&&json!("b@x")));
        assert!(values.contains(&&json!("c@x")));
    }

    #[test]
    fn test_missing_key_is_empty() {
        let doc = json!({"a": 1});
        let expr = PathExpr::parse("$.b.c").unwrap();
        assert!(expr.evaluate(&doc).is_empty());
        assert!(expr.first_scalar(&doc).is_none());
    }

    #[test]
    fn test_empty_document_probe() {
        let doc = json!({});
        for expr in ["$.a.b", "$.a[*].b", "$..x", "$.items[3]"] {
            let compiled = PathExpr::parse(expr).unwrap();
            assert!(compiled.evaluate(&doc).is_empty());
        }
    }

    #[test]
    fn test_first_scalar_skips_null() {
        let doc = json!({"vals": [null, "x"]});
        let expr = PathExpr::parse("$.vals").unwrap();
        assert_eq!(expr.first_scalar(&doc), Some(json!("x")));
    }
}
