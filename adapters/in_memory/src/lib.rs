//! In-memory implementation of GraphStore for testing and development.
//!
//! Upholds the same merge contract as the Neo4j adapter: idempotent merges
//! keyed by `(kb_id, label, key)` and `(kb_id, type, from, to)`, provenance
//! stamped on every write, a key unique across labels within a KB, and
//! cosine-similarity vector search.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use graphloom_core::errors::GraphError;
use graphloom_core::traits::GraphStore;
use graphloom_core::types::{
    EdgeRecord, GraphRows, KbId, MergeCounts, NodeRecord, SearchFilters, SearchHit, WriteScope,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredNode {
    label: String,
    key: String,
    props: Map<String, Value>,
    embedding: Option<Vec<f32>>,
    source_id: String,
    run_id: String,
    updated_at: DateTime<Utc>,
}

impl StoredNode {
    fn to_props(&self, kb_id: &str) -> Map<String, Value> {
        let mut props = self.props.clone();
        props.insert("kb_id".to_string(), json!(kb_id));
        props.insert("key".to_string(), json!(self.key));
        props.insert("source_id".to_string(), json!(self.source_id));
        props.insert("run_id".to_string(), json!(self.run_id));
        props.insert("updated_at".to_string(), json!(self.updated_at.to_rfc3339()));
        props
    }
}

#[derive(Debug, Clone)]
struct StoredEdge {
    props: Map<String, Value>,
    source_id: String,
    run_id: String,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct KbState {
    vector_dim: usize,
    /// Node key is unique across labels within a KB
    nodes: HashMap<String, StoredNode>,
    /// Edge identity: (type, from key, to key)
    edges: HashMap<(String, String, String), StoredEdge>,
}

#[derive(Debug, Default)]
struct MemoryState {
    kbs: HashMap<String, KbState>,
}

/// In-memory GraphStore implementation
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node and edge counts of a KB
    pub async fn stats(&self, kb_id: &KbId) -> (usize, usize) {
        let state = self.state.read().await;
        state
            .kbs
            .get(kb_id.as_str())
            .map(|kb| (kb.nodes.len(), kb.edges.len()))
            .unwrap_or((0, 0))
    }

    /// Clear all data
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        *state = MemoryState::default();
    }

    /// Full property map (including provenance) of one node, for assertions
    pub async fn node_props(
        &self,
        kb_id: &KbId,
        label: &str,
        key: &str,
    ) -> Option<Map<String, Value>> {
        let state = self.state.read().await;
        state
            .kbs
            .get(kb_id.as_str())
            .and_then(|kb| kb.nodes.get(key))
            .filter(|node| node.label == label)
            .map(|node| node.to_props(kb_id.as_str()))
    }

    /// The stored embedding of one node, for assertions
    pub async fn node_embedding(&self, kb_id: &KbId, key: &str) -> Option<Vec<f32>> {
        let state = self.state.read().await;
        state
            .kbs
            .get(kb_id.as_str())
            .and_then(|kb| kb.nodes.get(key))
            .and_then(|node| node.embedding.clone())
    }

    /// Provenance `(source_id, run_id, updated_at)` of one edge, for assertions
    pub async fn edge_provenance(
        &self,
        kb_id: &KbId,
        rel_type: &str,
        from_key: &str,
        to_key: &str,
    ) -> Option<(String, String, DateTime<Utc>)> {
        let state = self.state.read().await;
        state
            .kbs
            .get(kb_id.as_str())
            .and_then(|kb| {
                kb.edges
                    .get(&(rel_type.to_string(), from_key.to_string(), to_key.to_string()))
            })
            .map(|edge| (edge.source_id.clone(), edge.run_id.clone(), edge.updated_at))
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl GraphStore for InMemoryStore {
    async fn ensure_kb(&self, kb_id: &KbId, vector_dim: usize) -> Result<(), GraphError> {
        let mut state = self.state.write().await;
        match state.kbs.get(kb_id.as_str()) {
            Some(existing) if existing.vector_dim != vector_dim => {
                Err(GraphError::DimensionMismatch {
                    index: format!("{}_vector_index", kb_id),
                    expected: existing.vector_dim,
                    actual: vector_dim,
                })
            }
            Some(_) => Ok(()),
            None => {
                debug!(%kb_id, vector_dim, "kb initialized");
                state.kbs.insert(
                    kb_id.as_str().to_string(),
                    KbState {
                        vector_dim,
                        ..Default::default()
                    },
                );
                Ok(())
            }
        }
    }

    async fn vector_index_dim(&self, kb_id: &KbId) -> Result<Option<usize>, GraphError> {
        let state = self.state.read().await;
        Ok(state.kbs.get(kb_id.as_str()).map(|kb| kb.vector_dim))
    }

    async fn merge_document(
        &self,
        scope: &WriteScope,
        nodes: &[NodeRecord],
        edges: &[EdgeRecord],
    ) -> Result<MergeCounts, GraphError> {
        let mut state = self.state.write().await;
        let kb = state
            .kbs
            .get_mut(scope.kb_id.as_str())
            .ok_or_else(|| GraphError::DatabaseError(format!("unknown kb '{}'", scope.kb_id)))?;

        let now = Utc::now();
        let mut counts = MergeCounts::default();

        for node in nodes {
            match kb.nodes.get_mut(&node.key) {
                Some(existing) => {
                    if existing.label != node.label {
                        return Err(GraphError::ConstraintViolation(format!(
                            "key '{}' already bound to label '{}' (incoming '{}')",
                            node.key, existing.label, node.label
                        )));
                    }
                    for (prop, value) in &node.props {
                        existing.props.insert(prop.clone(), value.clone());
                    }
                    if let Some(ref embedding) = node.embedding {
                        existing.embedding = Some(embedding.clone());
                    }
                    existing.source_id = scope.source_id.as_str().to_string();
                    existing.run_id = scope.run_id.as_str().to_string();
                    existing.updated_at = now;
                    counts.nodes_updated += 1;
                }
                None => {
                    kb.nodes.insert(
                        node.key.clone(),
                        StoredNode {
                            label: node.label.clone(),
                            key: node.key.clone(),
                            props: node.props.clone(),
                            embedding: node.embedding.clone(),
                            source_id: scope.source_id.as_str().to_string(),
                            run_id: scope.run_id.as_str().to_string(),
                            updated_at: now,
                        },
                    );
                    counts.nodes_created += 1;
                }
            }
        }

        for edge in edges {
            // Both endpoints must already exist; a dangling reference is a
            // no-op, matching MATCH + MERGE semantics
            let from_ok = kb
                .nodes
                .get(&edge.from.key)
                .map_or(false, |n| n.label == edge.from.label);
            let to_ok = kb
                .nodes
                .get(&edge.to.key)
                .map_or(false, |n| n.label == edge.to.label);
            if !from_ok || !to_ok {
                continue;
            }

            let identity = (
                edge.rel_type.clone(),
                edge.from.key.clone(),
                edge.to.key.clone(),
            );
            match kb.edges.get_mut(&identity) {
                Some(existing) => {
                    for (prop, value) in &edge.props {
                        existing.props.insert(prop.clone(), value.clone());
                    }
                    existing.source_id = scope.source_id.as_str().to_string();
                    existing.run_id = scope.run_id.as_str().to_string();
                    existing.updated_at = now;
                    counts.relationships_updated += 1;
                }
                None => {
                    kb.edges.insert(
                        identity,
                        StoredEdge {
                            props: edge.props.clone(),
                            source_id: scope.source_id.as_str().to_string(),
                            run_id: scope.run_id.as_str().to_string(),
                            updated_at: now,
                        },
                    );
                    counts.relationships_created += 1;
                }
            }
        }

        Ok(counts)
    }

    async fn vector_search(
        &self,
        kb_id: &KbId,
        query: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, GraphError> {
        let state = self.state.read().await;
        let kb = match state.kbs.get(kb_id.as_str()) {
            Some(kb) => kb,
            None => return Ok(Vec::new()),
        };

        let mut hits: Vec<SearchHit> = kb
            .nodes
            .values()
            .filter_map(|node| {
                let embedding = node.embedding.as_ref()?;
                let props = node.to_props(kb_id.as_str());
                if !filters.matches(&node.label, &props) {
                    return None;
                }
                Some(SearchHit {
                    node: props,
                    score: cosine_similarity(query, embedding),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn read_query(
        &self,
        _kb_id: &KbId,
        _query: &str,
        _params: Map<String, Value>,
    ) -> Result<GraphRows, GraphError> {
        Err(GraphError::QueryFailed(
            "raw graph queries are not supported by the in-memory adapter".to_string(),
        ))
    }

    async fn count_nodes(&self, kb_id: &KbId) -> Result<u64, GraphError> {
        Ok(self.stats(kb_id).await.0 as u64)
    }

    async fn count_relationships(&self, kb_id: &KbId) -> Result<u64, GraphError> {
        Ok(self.stats(kb_id).await.1 as u64)
    }

    async fn health_check(&self) -> Result<(), GraphError> {
        let state = self.state.read().await;
        debug!(kbs = state.kbs.len(), "in-memory store health check");
        Ok(())
    }
}
