//! Core traits defining the pluggable interfaces for GraphLoom

use crate::errors::{EmbedError, GraphError, SourceError};
use crate::types::{
    AuthCredential, EdgeRecord, GraphRows, KbId, MergeCounts, NodeRecord, PullBatch, SearchFilters,
    SearchHit, SourceConfig, WriteScope,
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Core trait for graph storage backends.
///
/// Implementations own all writes to the graph and must uphold the merge
/// contract: replaying the same records under a new run id creates nothing
/// new, advances `run_id`/`updated_at` on every touched entity, and leaves
/// property values equal to the latest input.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Idempotently prepare a knowledge base: node-key uniqueness constraint
    /// scoped by `kb_id` and a vector index `<kb_id>_vector_index` of the
    /// given dimension with cosine similarity.
    async fn ensure_kb(&self, kb_id: &KbId, vector_dim: usize) -> Result<(), GraphError>;

    /// Dimension of the KB's vector index, if one exists
    async fn vector_index_dim(&self, kb_id: &KbId) -> Result<Option<usize>, GraphError>;

    /// Merge one document's nodes and edges in a single transaction,
    /// stamping provenance from `scope` and `updated_at = now` on every
    /// touched entity.
    async fn merge_document(
        &self,
        scope: &WriteScope,
        nodes: &[NodeRecord],
        edges: &[EdgeRecord],
    ) -> Result<MergeCounts, GraphError>;

    /// Vector similarity query scoped to a KB, with post-ANN filters,
    /// ordered by descending cosine similarity.
    async fn vector_search(
        &self,
        kb_id: &KbId,
        query: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, GraphError>;

    /// Execute a read-only parameterized query scoped to a KB. The query has
    /// already passed the write-clause guard; `kb_id` is bound as a
    /// parameter.
    async fn read_query(
        &self,
        kb_id: &KbId,
        query: &str,
        params: Map<String, Value>,
    ) -> Result<GraphRows, GraphError>;

    /// Count nodes carrying this `kb_id`
    async fn count_nodes(&self, kb_id: &KbId) -> Result<u64, GraphError>;

    /// Count relationships carrying this `kb_id`
    async fn count_relationships(&self, kb_id: &KbId) -> Result<u64, GraphError>;

    /// Test the connection to the storage backend
    async fn health_check(&self) -> Result<(), GraphError>;
}

/// Trait for text embedding providers.
///
/// Vectors are fixed-length; `dim()` must be stable across calls.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name in `family:model` form (e.g. "ollama:mxbai-embed-large")
    fn name(&self) -> &str;

    /// Output dimensionality of this provider
    fn dim(&self) -> usize;

    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Embed a batch of texts. The default embeds sequentially; providers
    /// with a batch endpoint should override.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Factory resolving a `family:model` provider reference to a live provider.
///
/// The orchestrator consults the factory at schema registration to learn the
/// provider dimension, and at ingest/search time to embed.
pub trait EmbedderFactory: Send + Sync {
    fn create(&self, provider: &str) -> Result<Arc<dyn EmbeddingProvider>, EmbedError>;
}

/// Trait for document sources the orchestrator pulls from.
///
/// The production implementation is the HTTP connector client; tests inject
/// scripted sources.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Pull documents modified at or after `since` (opaque ISO-8601 cursor)
    async fn pull(
        &self,
        source: &SourceConfig,
        since: Option<&str>,
    ) -> Result<PullBatch, SourceError>;

    /// Probe the connector's `/health` endpoint
    async fn health(&self, source: &SourceConfig) -> Result<(), SourceError>;
}

/// Resolves an opaque `auth_ref` into a credential. Resolution policy lives
/// in the transport shell; the core only consumes the result.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, auth_ref: &str) -> Option<AuthCredential>;
}

/// Resolver that knows no credentials
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialResolver for NoCredentials {
    fn resolve(&self, _auth_ref: &str) -> Option<AuthCredential> {
        None
    }
}
