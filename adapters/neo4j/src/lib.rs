//! Neo4j adapter for the GraphLoom GraphStore trait

use async_trait::async_trait;
use chrono::Utc;
use graphloom_core::errors::GraphError;
use graphloom_core::traits::GraphStore;
use graphloom_core::types::{
    EdgeRecord, GraphRows, KbId, MergeCounts, NodeRecord, SearchFilters, SearchHit, WriteScope,
};
use neo4rs::{Graph, Query};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info};

mod config;
mod queries;
mod utils;

pub use config::Neo4jConfig;
use utils::{return_aliases, sanitize_index_name, sanitize_label, sanitize_rel_type};

/// How many ANN candidates to over-fetch before post-filtering
const ANN_OVERFETCH: usize = 4;

/// Neo4j implementation of GraphStore
pub struct Neo4jStore {
    graph: Graph,
    config: Neo4jConfig,
    /// Bounded transaction slots; exhaustion surfaces as Busy
    permits: Arc<Semaphore>,
}

impl Neo4jStore {
    /// Connect, verify the connection and install the global key constraint
    pub async fn new(config: Neo4jConfig) -> Result<Self, GraphError> {
        info!("connecting to Neo4j at {}", config.uri);

        let graph = Graph::new(
            &config.uri,
            config.user.as_deref().unwrap_or("neo4j"),
            config.password.as_deref().unwrap_or("neo4j"),
        )
        .await
        .map_err(|e| GraphError::ConnectionFailed(format!("Neo4j connection failed: {}", e)))?;

        let permits = Arc::new(Semaphore::new(config.max_connections.max(1)));
        let store = Self {
            graph,
            config,
            permits,
        };
        store.health_check().await?;

        store
            .run(Query::new(queries::CREATE_KEY_CONSTRAINT.to_string()))
            .await?;
        Ok(store)
    }

    async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>, GraphError> {
        let wait = Duration::from_millis(self.config.pool_wait_ms);
        match tokio::time::timeout(wait, self.permits.acquire()).await {
            Ok(Ok(permit)) => Ok(permit),
            _ => Err(GraphError::Busy),
        }
    }

    /// Execute a statement, discarding rows
    async fn run(&self, query: Query) -> Result<(), GraphError> {
        let mut result = self
            .graph
            .execute(query)
            .await
            .map_err(|e| GraphError::QueryFailed(format!("statement failed: {}", e)))?;
        while result
            .next()
            .await
            .map_err(|e| GraphError::QueryFailed(format!("failed to drain result: {}", e)))?
            .is_some()
        {}
        Ok(())
    }

    fn merge_node_query(scope: &WriteScope, node: &NodeRecord) -> Result<Query, GraphError> {
        let label = sanitize_label(&node.label)?;
        let statement = queries::MERGE_NODE.replace("${label}", label);

        let mut props = node.props.clone();
        if let Some(ref embedding) = node.embedding {
            props.insert(
                "embedding".to_string(),
                Value::Array(
                    embedding
                        .iter()
                        .map(|x| Value::from(f64::from(*x)))
                        .collect(),
                ),
            );
        }

        let mut params = HashMap::new();
        params.insert("kb_id".to_string(), Value::String(scope.kb_id.to_string()));
        params.insert("key".to_string(), Value::String(node.key.clone()));
        params.insert("props".to_string(), Value::Object(props));
        params.insert(
            "source_id".to_string(),
            Value::String(scope.source_id.to_string()),
        );
        params.insert("run_id".to_string(), Value::String(scope.run_id.to_string()));
        params.insert(
            "updated_at".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        Ok(Query::new(statement).params(params))
    }

    fn merge_edge_query(scope: &WriteScope, edge: &EdgeRecord) -> Result<Query, GraphError> {
        let statement = queries::MERGE_EDGE
            .replace("${from_label}", sanitize_label(&edge.from.label)?)
            .replace("${to_label}", sanitize_label(&edge.to.label)?)
            .replace("${rel_type}", sanitize_rel_type(&edge.rel_type)?);

        let mut params = HashMap::new();
        params.insert("kb_id".to_string(), Value::String(scope.kb_id.to_string()));
        params.insert("from_key".to_string(), Value::String(edge.from.key.clone()));
        params.insert("to_key".to_string(), Value::String(edge.to.key.clone()));
        params.insert("props".to_string(), Value::Object(edge.props.clone()));
        params.insert(
            "source_id".to_string(),
            Value::String(scope.source_id.to_string()),
        );
        params.insert("run_id".to_string(), Value::String(scope.run_id.to_string()));
        params.insert(
            "updated_at".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        Ok(Query::new(statement).params(params))
    }

    fn index_name(kb_id: &KbId) -> String {
        format!("{}_vector_index", kb_id.as_str())
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn ensure_kb(&self, kb_id: &KbId, vector_dim: usize) -> Result<(), GraphError> {
        let _permit = self.acquire().await?;

        // A provider change with a different dimension is rejected; the
        // recorded dimension is the truth for the life of the index.
        if let Some(existing) = self.vector_index_dim(kb_id).await? {
            if existing != vector_dim {
                return Err(GraphError::DimensionMismatch {
                    index: Self::index_name(kb_id),
                    expected: existing,
                    actual: vector_dim,
                });
            }
            return Ok(());
        }

        let index_name = Self::index_name(kb_id);
        let statement = queries::CREATE_VECTOR_INDEX
            .replace("${index_name}", sanitize_index_name(&index_name)?)
            .replace("${dim}", &vector_dim.to_string());
        debug!(%kb_id, vector_dim, "creating vector index {}", index_name);
        self.run(Query::new(statement)).await?;

        let mut params = HashMap::new();
        params.insert("kb_id".to_string(), Value::String(kb_id.to_string()));
        params.insert("dim".to_string(), Value::from(vector_dim as i64));
        self.run(Query::new(queries::UPSERT_KB_META.to_string()).params(params))
            .await?;

        info!(%kb_id, vector_dim, "knowledge base prepared");
        Ok(())
    }

    async fn vector_index_dim(&self, kb_id: &KbId) -> Result<Option<usize>, GraphError> {
        let mut params = HashMap::new();
        params.insert("kb_id".to_string(), Value::String(kb_id.to_string()));

        let mut result = self
            .graph
            .execute(Query::new(queries::GET_KB_META_DIM.to_string()).params(params))
            .await
            .map_err(|e| GraphError::QueryFailed(format!("meta lookup failed: {}", e)))?;

        if let Some(row) = result
            .next()
            .await
            .map_err(|e| GraphError::QueryFailed(format!("failed to fetch row: {}", e)))?
        {
            let dim: i64 = row
                .get("vector_dim")
                .map_err(|e| GraphError::DatabaseError(format!("missing vector_dim: {}", e)))?;
            return Ok(Some(dim as usize));
        }
        Ok(None)
    }

    async fn merge_document(
        &self,
        scope: &WriteScope,
        nodes: &[NodeRecord],
        edges: &[EdgeRecord],
    ) -> Result<MergeCounts, GraphError> {
        let _permit = self.acquire().await?;

        // One transaction per document: its nodes and edges commit or fail
        // together, independently of every other document in the run.
        let mut txn = self
            .graph
            .start_txn()
            .await
            .map_err(|e| GraphError::TransactionFailed(format!("begin failed: {}", e)))?;

        let mut counts = MergeCounts::default();

        for node in nodes {
            let query = Self::merge_node_query(scope, node)?;
            let mut result = txn
                .execute(query)
                .await
                .map_err(|e| GraphError::QueryFailed(format!("node merge failed: {}", e)))?;
            if let Some(row) = result
                .next()
                .await
                .map_err(|e| GraphError::QueryFailed(format!("failed to fetch row: {}", e)))?
            {
                let created: bool = row.get("created").unwrap_or(false);
                if created {
                    counts.nodes_created += 1;
                } else {
                    counts.nodes_updated += 1;
                }
            }
        }

        for edge in edges {
            let query = Self::merge_edge_query(scope, edge)?;
            let mut result = txn
                .execute(query)
                .await
                .map_err(|e| GraphError::QueryFailed(format!("edge merge failed: {}", e)))?;
            // No row means an endpoint was missing and nothing was merged
            if let Some(row) = result
                .next()
                .await
                .map_err(|e| GraphError::QueryFailed(format!("failed to fetch row: {}", e)))?
            {
                let created: bool = row.get("created").unwrap_or(false);
                if created {
                    counts.relationships_created += 1;
                } else {
                    counts.relationships_updated += 1;
                }
            }
        }

        txn.commit()
            .await
            .map_err(|e| GraphError::TransactionFailed(format!("commit failed: {}", e)))?;

        debug!(
            kb_id = %scope.kb_id,
            run_id = %scope.run_id,
            nodes = nodes.len(),
            edges = edges.len(),
            created = counts.nodes_created + counts.relationships_created,
            "document merged"
        );
        Ok(counts)
    }

    async fn vector_search(
        &self,
        kb_id: &KbId,
        query: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, GraphError> {
        let _permit = self.acquire().await?;

        let fetch = if filters.is_empty() {
            top_k
        } else {
            top_k.saturating_mul(ANN_OVERFETCH)
        };
        let mut params = HashMap::new();
        params.insert(
            "index_name".to_string(),
            Value::String(Self::index_name(kb_id)),
        );
        params.insert("k".to_string(), Value::from(fetch as i64));
        params.insert(
            "embedding".to_string(),
            Value::Array(query.iter().map(|x| Value::from(f64::from(*x))).collect()),
        );
        params.insert("kb_id".to_string(), Value::String(kb_id.to_string()));

        let mut result = self
            .graph
            .execute(Query::new(queries::VECTOR_QUERY.to_string()).params(params))
            .await
            .map_err(|e| GraphError::QueryFailed(format!("vector query failed: {}", e)))?;

        let mut hits = Vec::new();
        while let Some(row) = result
            .next()
            .await
            .map_err(|e| GraphError::QueryFailed(format!("failed to fetch row: {}", e)))?
        {
            let node: neo4rs::Node = match row.get("node") {
                Ok(node) => node,
                Err(_) => continue,
            };
            let score: f64 = row.get("score").unwrap_or(0.0);

            let label = node.labels().first().cloned().unwrap_or_default();
            let mut props: Map<String, Value> =
                node.properties().clone().into_iter().collect();
            // The raw vector is payload noise in search results
            props.remove("embedding");

            if !filters.matches(&label, &props) {
                continue;
            }
            hits.push(SearchHit {
                node: props,
                score: score as f32,
            });
            if hits.len() >= top_k {
                break;
            }
        }
        Ok(hits)
    }

    async fn read_query(
        &self,
        kb_id: &KbId,
        query: &str,
        params: Map<String, Value>,
    ) -> Result<GraphRows, GraphError> {
        let _permit = self.acquire().await?;
        let aliases = return_aliases(query)?;

        // Every query is implicitly scoped: kb_id is always bound
        let mut bound: HashMap<String, Value> = params.into_iter().collect();
        bound.insert("kb_id".to_string(), Value::String(kb_id.to_string()));

        debug!(%kb_id, "executing read query");
        let mut result = self
            .graph
            .execute(Query::new(query.to_string()).params(bound))
            .await
            .map_err(|e| GraphError::QueryFailed(format!("query execution failed: {}", e)))?;

        let mut rows = Vec::new();
        while let Some(row) = result
            .next()
            .await
            .map_err(|e| GraphError::QueryFailed(format!("failed to fetch row: {}", e)))?
        {
            let mut projected = Map::new();
            for alias in &aliases {
                let value: Value = row.get(alias.as_str()).unwrap_or(Value::Null);
                projected.insert(alias.clone(), value);
            }
            rows.push(projected);
        }

        let count = rows.len();
        Ok(GraphRows { rows, count })
    }

    async fn count_nodes(&self, kb_id: &KbId) -> Result<u64, GraphError> {
        let mut params = HashMap::new();
        params.insert("kb_id".to_string(), Value::String(kb_id.to_string()));
        let mut result = self
            .graph
            .execute(Query::new(queries::COUNT_NODES.to_string()).params(params))
            .await
            .map_err(|e| GraphError::QueryFailed(format!("count failed: {}", e)))?;
        if let Some(row) = result
            .next()
            .await
            .map_err(|e| GraphError::QueryFailed(format!("failed to fetch row: {}", e)))?
        {
            let count: i64 = row
                .get("node_count")
                .map_err(|e| GraphError::QueryFailed(format!("missing node_count: {}", e)))?;
            return Ok(count as u64);
        }
        Ok(0)
    }

    async fn count_relationships(&self, kb_id: &KbId) -> Result<u64, GraphError> {
        let mut params = HashMap::new();
        params.insert("kb_id".to_string(), Value::String(kb_id.to_string()));
        let mut result = self
            .graph
            .execute(Query::new(queries::COUNT_RELATIONSHIPS.to_string()).params(params))
            .await
            .map_err(|e| GraphError::QueryFailed(format!("count failed: {}", e)))?;
        if let Some(row) = result
            .next()
            .await
            .map_err(|e| GraphError::QueryFailed(format!("failed to fetch row: {}", e)))?
        {
            let count: i64 = row.get("relationship_count").map_err(|e| {
                GraphError::QueryFailed(format!("missing relationship_count: {}", e))
            })?;
            return Ok(count as u64);
        }
        Ok(0)
    }

    async fn health_check(&self) -> Result<(), GraphError> {
        let query = Query::new("RETURN 1 as test".to_string());
        let mut result = self
            .graph
            .execute(query)
            .await
            .map_err(|e| GraphError::ConnectionFailed(format!("health check failed: {}", e)))?;
        if result
            .next()
            .await
            .map_err(|e| GraphError::ConnectionFailed(format!("health check result failed: {}", e)))?
            .is_some()
        {
            Ok(())
        } else {
            Err(GraphError::ConnectionFailed(
                "health check returned no results".to_string(),
            ))
        }
    }
}
