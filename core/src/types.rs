//! Core data types for GraphLoom

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Unique identifier for a knowledge base
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KbId(pub String);

impl KbId {
    /// Create a new KbId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for KbId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a source within a knowledge base
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single ingestion run. Monotonic and time-based: runs sort
/// by start time, ties broken by a process-local sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node emitted by the mapping engine, addressed by `(label, key)` within
/// its knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// The declared node label (e.g. "Document", "Person")
    pub label: String,
    /// Value of the label's uniqueness-key property
    pub key: String,
    /// Mapped properties (always includes the key property)
    pub props: Map<String, Value>,
    /// Optional embedding vector attached by the embedding pipeline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl NodeRecord {
    /// Create a new node record with the given label and key
    pub fn new(label: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            key: key.into(),
            props: Map::new(),
            embedding: None,
        }
    }

    /// Set all properties for this node
    pub fn with_props(mut self, props: Map<String, Value>) -> Self {
        self.props = props;
        self
    }

    /// Add a single property to this node
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.props.insert(key.into(), value);
        self
    }

    /// Attach an embedding vector
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Reference to a node endpoint of an edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub label: String,
    pub key: String,
}

impl NodeRef {
    pub fn new(label: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            key: key.into(),
        }
    }
}

/// A directed, typed relationship emitted by the mapping engine, addressed by
/// `(type, from.key, to.key)` within its knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// The declared relationship type (e.g. "AUTHORED_BY")
    pub rel_type: String,
    pub from: NodeRef,
    pub to: NodeRef,
    pub props: Map<String, Value>,
}

impl EdgeRecord {
    pub fn new(rel_type: impl Into<String>, from: NodeRef, to: NodeRef) -> Self {
        Self {
            rel_type: rel_type.into(),
            from,
            to,
            props: Map::new(),
        }
    }

    pub fn with_props(mut self, props: Map<String, Value>) -> Self {
        self.props = props;
        self
    }
}

/// Provenance scope stamped onto every node and relationship a run writes.
/// `updated_at` is set by the store at merge time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteScope {
    pub kb_id: KbId,
    pub source_id: SourceId,
    pub run_id: RunId,
}

impl WriteScope {
    pub fn new(kb_id: KbId, source_id: SourceId, run_id: RunId) -> Self {
        Self {
            kb_id,
            source_id,
            run_id,
        }
    }
}

/// Outcome counters of merging one document's records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeCounts {
    pub nodes_created: u64,
    pub nodes_updated: u64,
    pub relationships_created: u64,
    pub relationships_updated: u64,
}

impl MergeCounts {
    /// Accumulate another set of counters into this one
    pub fn absorb(&mut self, other: MergeCounts) {
        self.nodes_created += other.nodes_created;
        self.nodes_updated += other.nodes_updated;
        self.relationships_created += other.relationships_created;
        self.relationships_updated += other.relationships_updated;
    }
}

/// Post-ANN filters for semantic search. Labels combine with OR, properties
/// with AND.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.properties.is_empty()
    }

    /// Check whether a node (labels + properties) passes the filters
    pub fn matches(&self, node_label: &str, props: &Map<String, Value>) -> bool {
        if !self.labels.is_empty() && !self.labels.iter().any(|l| l == node_label) {
            return false;
        }
        self.properties
            .iter()
            .all(|(k, expected)| props.get(k) == Some(expected))
    }
}

/// One semantic search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Node properties, including provenance
    pub node: Map<String, Value>,
    /// Cosine similarity score
    pub score: f32,
}

/// Result rows of a parameterized graph query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRows {
    pub rows: Vec<Map<String, Value>>,
    pub count: usize,
}

/// Registered source of documents for a knowledge base
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kb_id: KbId,
    pub source_id: SourceId,
    /// Base URL of the connector process serving `/pull` and `/health`
    pub connector_url: String,
    /// Opaque reference to a credential; resolution belongs to the transport shell
    pub auth_ref: Option<String>,
    /// Name of the schema mapping this source feeds (`mappings.sources[].source_id`)
    pub mapping_name: String,
}

/// Resolved credential for connector requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthCredential {
    Bearer(String),
    Basic { username: String, password: String },
}

/// One batch of documents pulled from a connector
#[derive(Debug, Clone, Deserialize)]
pub struct PullBatch {
    pub documents: Vec<Value>,
    #[serde(default)]
    pub next_since: Option<String>,
}

/// A timestamped error captured on a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub message: String,
    pub at: DateTime<Utc>,
}

impl RunError {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_record_builder() {
        let node = NodeRecord::new("Document", "d1")
            .with_property("id", json!("d1"))
            .with_property("title", json!("T1"));

        assert_eq!(node.label, "Document");
        assert_eq!(node.key, "d1");
        assert_eq!(node.props.get("title"), Some(&json!("T1")));
        assert!(node.embedding.is_none());
    }

    #[test]
    fn test_merge_counts_absorb() {
        let mut total = MergeCounts::default();
        total.absorb(MergeCounts {
            nodes_created: 2,
            nodes_updated: 0,
            relationships_created: 1,
            relationships_updated: 0,
        });
        total.absorb(MergeCounts {
            nodes_created: 0,
            nodes_updated: 2,
            relationships_created: 0,
            relationships_updated: 1,
        });

        assert_eq!(total.nodes_created, 2);
        assert_eq!(total.nodes_updated, 2);
        assert_eq!(total.relationships_created, 1);
        assert_eq!(total.relationships_updated, 1);
    }

    #[test]
    fn test_search_filters() {
        let mut props = Map::new();
        props.insert("lang".to_string(), json!("en"));
        props.insert("stars".to_string(), json!(5));

        let filters = SearchFilters {
            labels: vec!["Document".to_string(), "Page".to_string()],
            properties: {
                let mut m = Map::new();
                m.insert("lang".to_string(), json!("en"));
                m
            },
        };

        assert!(filters.matches("Document", &props));
        assert!(filters.matches("Page", &props));
        assert!(!filters.matches("Person", &props));

        let mut other = props.clone();
        other.insert("lang".to_string(), json!("de"));
        assert!(!filters.matches("Document", &other));
    }
}
