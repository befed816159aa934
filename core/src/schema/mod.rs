//! Schema DSL model.
//!
//! A schema arrives as YAML, deserializes into the permissive raw model, and
//! is compiled by [`validate`] into the typed [`KbSchema`] with every path
//! expression pre-compiled. The raw model keeps every field optional so the
//! validator can accumulate findings instead of stopping at the first.

pub mod validate;

use crate::embedding::ProviderRef;
use crate::path::PathExpr;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub use validate::compile;

// ---------------------------------------------------------------------------
// Raw (wire) model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSchema {
    pub kb_id: Option<String>,
    pub embedding: Option<RawEmbedding>,
    #[serde(default)]
    pub nodes: Vec<RawNode>,
    #[serde(default)]
    pub relationships: Vec<RawRelationship>,
    #[serde(default)]
    pub mappings: RawMappings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEmbedding {
    pub provider: Option<String>,
    pub chunking: Option<RawChunking>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawChunking {
    pub strategy: Option<String>,
    pub max_tokens: Option<i64>,
    pub overlap: Option<i64>,
    pub fields: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawNode {
    pub label: Option<String>,
    pub key: Option<String>,
    #[serde(default)]
    pub props: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRelationship {
    #[serde(rename = "type")]
    pub rel_type: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    #[serde(default)]
    pub props: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMappings {
    #[serde(default)]
    pub sources: Vec<RawSourceMapping>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSourceMapping {
    pub source_id: Option<String>,
    pub document_type: Option<String>,
    pub extract: Option<RawExtract>,
    #[serde(default)]
    pub edges: Vec<RawEdgeRule>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawExtract {
    pub node: Option<String>,
    #[serde(default)]
    pub assign: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEdgeRule {
    #[serde(rename = "type")]
    pub rel_type: Option<String>,
    pub from: Option<RawEndpoint>,
    pub to: Option<RawTarget>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEndpoint {
    pub node: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTarget {
    pub node: Option<String>,
    pub key: Option<String>,
    pub props: Option<BTreeMap<String, String>>,
}

// ---------------------------------------------------------------------------
// Validated model
// ---------------------------------------------------------------------------

/// Chunking strategy for embedding text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    ByHeadings,
    ByFields,
    Sentence,
    Paragraph,
}

impl std::str::FromStr for ChunkStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "by_headings" => Ok(ChunkStrategy::ByHeadings),
            "by_fields" => Ok(ChunkStrategy::ByFields),
            "sentence" => Ok(ChunkStrategy::Sentence),
            "paragraph" => Ok(ChunkStrategy::Paragraph),
            other => Err(format!(
                "unknown chunking strategy '{}', expected one of by_headings, by_fields, sentence, paragraph",
                other
            )),
        }
    }
}

/// Validated chunking configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkingSpec {
    pub strategy: ChunkStrategy,
    pub max_tokens: u32,
    pub overlap: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
}

/// Validated embedding configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbeddingSpec {
    pub provider: ProviderRef,
    pub chunking: ChunkingSpec,
}

/// Declared node shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSpec {
    pub label: String,
    /// Property used as the uniqueness key within `(kb_id, label)`
    pub key: String,
    pub props: Vec<String>,
}

/// Declared relationship shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationshipSpec {
    pub rel_type: String,
    pub from: String,
    pub to: String,
    pub props: Vec<String>,
}

/// Primary node extraction rule of a mapping
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractRule {
    pub node: String,
    /// Property assignments in sorted property order (deterministic emission)
    pub assign: Vec<(String, PathExpr)>,
}

/// Edge `from` endpoint rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointRule {
    pub node: String,
    pub key: PathExpr,
}

/// Edge `to` endpoint rule, optionally materializing a secondary node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetRule {
    pub node: String,
    pub key: PathExpr,
    /// Secondary node property assignments, sorted; empty when the edge only
    /// references an existing node
    pub props: Vec<(String, PathExpr)>,
}

/// One edge extraction rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeRule {
    pub rel_type: String,
    pub from: EndpointRule,
    pub to: TargetRule,
}

/// The rules projecting one source's documents into the graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceMapping {
    pub source_id: String,
    pub document_type: String,
    pub extract: ExtractRule,
    pub edges: Vec<EdgeRule>,
}

/// A fully validated, compiled schema
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KbSchema {
    pub kb_id: String,
    pub embedding: EmbeddingSpec,
    pub nodes: Vec<NodeSpec>,
    pub relationships: Vec<RelationshipSpec>,
    pub mappings: Vec<SourceMapping>,
}

impl KbSchema {
    /// Look up a declared node by label
    pub fn node_spec(&self, label: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.label == label)
    }

    /// Look up a mapping by name (`mappings.sources[].source_id`)
    pub fn mapping(&self, name: &str) -> Option<&SourceMapping> {
        self.mappings.iter().find(|m| m.source_id == name)
    }

    /// Canonical textual form used for schema equality: declaration order of
    /// nodes/relationships/mappings is insignificant, string whitespace is
    /// collapsed. Edge order inside a mapping stays significant (it drives
    /// emission order).
    pub fn normalized(&self) -> String {
        let mut sorted = self.clone();
        sorted.nodes.sort_by(|a, b| a.label.cmp(&b.label));
        sorted
            .relationships
            .sort_by(|a, b| (&a.rel_type, &a.from, &a.to).cmp(&(&b.rel_type, &b.from, &b.to)));
        sorted.mappings.sort_by(|a, b| a.source_id.cmp(&b.source_id));

        let mut value = serde_json::to_value(&sorted).unwrap_or(Value::Null);
        collapse_whitespace(&mut value);
        value.to_string()
    }

    /// Schema equality per the normalized form
    pub fn is_equivalent(&self, other: &KbSchema) -> bool {
        self.normalized() == other.normalized()
    }
}

fn collapse_whitespace(value: &mut Value) {
    match value {
        Value::String(s) => {
            *s = s.split_whitespace().collect::<Vec<_>>().join(" ");
        }
        Value::Array(items) => {
            for item in items {
                collapse_whitespace(item);
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                collapse_whitespace(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
kb_id: demo
embedding:
  provider: "ollama:mxbai-embed-large"
  chunking:
    strategy: by_headings
    max_tokens: 1200
    overlap: 100
nodes:
  - label: Document
    key: id
    props: [id, title, content]
  - label: Person
    key: email
    props: [name, email]
relationships:
  - type: AUTHORED_BY
    from: Document
    to: Person
mappings:
  sources:
    - source_id: src1
      document_type: article
      extract:
        node: Document
        assign:
          id: "$.id"
          title: "$.title"
          content: "$.content"
      edges:
        - type: AUTHORED_BY
          from: { node: Document, key: "$.id" }
          to:
            node: Person
            key: "$.author.email"
            props:
              email: "$.author.email"
              name: "$.author.name"
"#;

    #[test]
    fn test_compile_base_schema() {
        let (schema, warnings) = compile(BASE).expect("base schema should compile");
        assert_eq!(schema.kb_id, "demo");
        assert_eq!(schema.nodes.len(), 2);
        assert_eq!(schema.relationships.len(), 1);
        assert_eq!(schema.mappings.len(), 1);
        assert_eq!(schema.mappings[0].edges.len(), 1);
        // email prop on Person is its key, so no identity warning
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
    }

    #[test]
    fn test_normalized_ignores_declaration_order() {
        let (a, _) = compile(BASE).unwrap();
        // Same schema with node declaration order flipped
        let flipped = BASE.replace(
            "nodes:\n  - label: Document\n    key: id\n    props: [id, title, content]\n  - label: Person\n    key: email\n    props: [name, email]",
            "nodes:\n  - label: Person\n    key: email\n    props: [name, email]\n  - label: Document\n    key: id\n    props: [id, title, content]",
        );
        let (b, _) = compile(&flipped).unwrap();
        assert!(a.is_equivalent(&b));
    }

    #[test]
    fn test_normalized_detects_changes() {
        let (a, _) = compile(BASE).unwrap();
        let changed = BASE.replace("max_tokens: 1200", "max_tokens: 1500");
        let (b, _) = compile(&changed).unwrap();
        assert!(!a.is_equivalent(&b));
    }

    #[test]
    fn test_lookup_helpers() {
        let (schema, _) = compile(BASE).unwrap();
        assert_eq!(schema.node_spec("Person").map(|n| n.key.as_str()), Some("email"));
        assert!(schema.node_spec("Ghost").is_none());
        assert!(schema.mapping("src1").is_some());
        assert!(schema.mapping("src2").is_none());
    }
}
