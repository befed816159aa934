//! The ingestion orchestrator: the transport-agnostic operation surface
//! consumed by the shell.
//!
//! One instance owns the schema/source registry, the run table, and all
//! writes to the graph store. An ingestion run pulls a batch, then maps,
//! embeds and merges each document in its own transaction; per-document
//! failures are recorded on the run and never abort it.

use crate::config::OrchestratorConfig;
use crate::embedding::{self, ProviderRef, ThrottledProvider};
use crate::errors::{
    EmbedError, GraphError, MappingError, OrchestratorError, ValidationIssue, ValidationReport,
};
use crate::guard;
use crate::mapping::apply_mapping;
use crate::registry::Registry;
use crate::runs::{RunManager, RunState};
use crate::schema::{self, KbSchema, SourceMapping};
use crate::status::{derive_status, KbStatus};
use crate::traits::{DocumentSource, EmbedderFactory, EmbeddingProvider, GraphStore};
use crate::types::{
    GraphRows, KbId, MergeCounts, RunError, RunId, SearchFilters, SearchHit, SourceConfig,
    SourceId, WriteScope,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Result of `register_schema`
#[derive(Debug, Clone, Serialize)]
pub struct SchemaReceipt {
    pub kb_id: KbId,
    pub schema_version: u32,
    pub nodes_count: usize,
    pub rels_count: usize,
    pub sources_count: usize,
    pub warnings: Vec<ValidationIssue>,
}

/// Result of `ingest`
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub run_id: RunId,
    pub state: RunState,
    pub processed: u64,
    pub created_nodes: u64,
    pub updated_nodes: u64,
    pub created_rels: u64,
    pub updated_rels: u64,
    pub errors: Vec<RunError>,
    pub warnings: Vec<RunError>,
    /// Cursor to resume the next incremental pull from
    pub next_since: Option<String>,
}

#[derive(Error, Debug)]
enum DocError {
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("store: {0}")]
    Store(#[from] GraphError),
}

/// Caches one throttled provider instance per `family:model` reference
struct EmbedderCache {
    factory: Arc<dyn EmbedderFactory>,
    pool_max: usize,
    cache: Mutex<HashMap<String, Arc<dyn EmbeddingProvider>>>,
}

impl EmbedderCache {
    fn get(&self, provider: &ProviderRef) -> Result<Arc<dyn EmbeddingProvider>, EmbedError> {
        let key = provider.to_string();
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = cache.get(&key) {
            return Ok(cached.clone());
        }
        let inner = self.factory.create(&key)?;
        let throttled: Arc<dyn EmbeddingProvider> = Arc::new(ThrottledProvider::new(
            inner,
            Arc::new(Semaphore::new(self.pool_max)),
        ));
        cache.insert(key, throttled.clone());
        Ok(throttled)
    }
}

/// The ingestion orchestrator
pub struct Orchestrator {
    registry: Registry,
    runs: RunManager,
    store: Arc<dyn GraphStore>,
    source: Arc<dyn DocumentSource>,
    embedders: EmbedderCache,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn GraphStore>,
        source: Arc<dyn DocumentSource>,
        factory: Arc<dyn EmbedderFactory>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry: Registry::new(),
            runs: RunManager::new(config.run_history_max),
            store,
            source,
            embedders: EmbedderCache {
                factory,
                pool_max: config.embedding_pool_max.max(1),
                cache: Mutex::new(HashMap::new()),
            },
            config,
        }
    }

    /// Register (or update) a KB's schema from YAML.
    ///
    /// Creates the KB on first registration: uniqueness constraint plus a
    /// vector index dimensioned by the schema's embedding provider. Changing
    /// to a provider with a different dimension is rejected.
    pub async fn register_schema(
        &self,
        kb_id: &str,
        schema_yaml: &str,
    ) -> Result<SchemaReceipt, OrchestratorError> {
        let (schema, warnings) =
            schema::compile(schema_yaml).map_err(OrchestratorError::SchemaInvalid)?;

        if schema.kb_id != kb_id {
            let mut report = ValidationReport::default();
            report.error(ValidationIssue::new(
                "kb_id",
                format!(
                    "schema declares kb_id '{}' but was registered under '{}'",
                    schema.kb_id, kb_id
                ),
            ));
            return Err(OrchestratorError::SchemaInvalid(report));
        }
        let kb = KbId::new(kb_id);

        let embedder = self.embedders.get(&schema.embedding.provider)?;
        let dim = embedder.dim();

        if let Some(existing) = self.store.vector_index_dim(&kb).await? {
            if existing != dim {
                let mut report = ValidationReport::default();
                report.error(
                    ValidationIssue::new(
                        "embedding.provider",
                        format!(
                            "provider '{}' produces {}-dimensional vectors but the \
                             existing vector index has dimension {}",
                            schema.embedding.provider, dim, existing
                        ),
                    )
                    .with_suggestion("keep a provider with the original dimension".to_string()),
                );
                return Err(OrchestratorError::SchemaInvalid(report));
            }
        }

        self.store.ensure_kb(&kb, dim).await?;
        let entry = self
            .registry
            .store_schema(&kb, schema, warnings, dim)
            .await;

        Ok(SchemaReceipt {
            kb_id: kb,
            schema_version: entry.version,
            nodes_count: entry.schema.nodes.len(),
            rels_count: entry.schema.relationships.len(),
            sources_count: entry.schema.mappings.len(),
            warnings: entry.warnings,
        })
    }

    /// Register (or update) a document source of a KB
    pub async fn add_source(
        &self,
        kb_id: &str,
        source_id: &str,
        connector_url: &str,
        auth_ref: Option<&str>,
        mapping_name: &str,
    ) -> Result<(), OrchestratorError> {
        self.registry
            .add_source(SourceConfig {
                kb_id: KbId::new(kb_id),
                source_id: SourceId::new(source_id),
                connector_url: connector_url.to_string(),
                auth_ref: auth_ref.map(str::to_string),
                mapping_name: mapping_name.to_string(),
            })
            .await
    }

    /// Run one ingestion for a registered source.
    ///
    /// At most one run per `(kb_id, source_id)` at a time; a concurrent call
    /// returns `Conflict` with the active run id.
    pub async fn ingest(
        &self,
        kb_id: &str,
        source_id: &str,
        since: Option<&str>,
    ) -> Result<IngestReport, OrchestratorError> {
        let kb = KbId::new(kb_id);
        let source_id = SourceId::new(source_id);

        let entry = self
            .registry
            .schema(&kb)
            .await
            .ok_or_else(|| OrchestratorError::UnknownKb(kb.clone()))?;
        let source = self.registry.source(&kb, &source_id).await.ok_or_else(|| {
            OrchestratorError::UnknownSource {
                kb_id: kb.clone(),
                source_id: source_id.clone(),
            }
        })?;
        let mapping = entry
            .schema
            .mapping(&source.mapping_name)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownMapping {
                kb_id: kb.clone(),
                mapping_name: source.mapping_name.clone(),
            })?;
        let embedder = self.embedders.get(&entry.schema.embedding.provider)?;

        let handle = self.runs.start(&kb, &source_id)?;
        let run_id = handle.run_id.clone();
        let mut cancelled = handle.cancelled;

        // Pull one batch, abortable by cancellation
        let pulled = {
            let pull = self.source.pull(&source, since);
            tokio::select! {
                _ = cancelled.changed() => None,
                outcome = tokio::time::timeout(self.config.connector_timeout, pull) => Some(outcome),
            }
        };
        let batch = match pulled {
            None => return Ok(self.report(&run_id, None)),
            Some(Err(_)) => {
                let error = crate::errors::SourceError::Timeout(format!(
                    "pull exceeded {:?}",
                    self.config.connector_timeout
                ));
                self.runs.add_error(&run_id, error.to_string());
                self.runs.complete(&run_id, false);
                return Err(error.into());
            }
            Some(Ok(Err(error))) => {
                self.runs.add_error(&run_id, error.to_string());
                self.runs.complete(&run_id, false);
                return Err(error.into());
            }
            Some(Ok(Ok(batch))) => batch,
        };

        let total = batch.documents.len();
        debug!(%kb, %source_id, %run_id, documents = total, "processing pulled batch");

        let scope = WriteScope::new(kb.clone(), source_id.clone(), run_id.clone());
        let mut successes: u64 = 0;
        let mut failures: u64 = 0;

        for (index, doc) in batch.documents.iter().enumerate() {
            if *cancelled.borrow() {
                break;
            }
            let work = self.process_document(&scope, doc, &mapping, &entry.schema, embedder.as_ref());
            let outcome = tokio::select! {
                _ = cancelled.changed() => break,
                outcome = tokio::time::timeout(self.config.doc_timeout, work) => outcome,
            };
            match outcome {
                Err(_) => {
                    failures += 1;
                    self.runs.add_error(
                        &run_id,
                        format!(
                            "document {}: timed out after {:?}",
                            index, self.config.doc_timeout
                        ),
                    );
                }
                Ok(Err(error)) => {
                    failures += 1;
                    self.runs
                        .add_error(&run_id, format!("document {}: {}", index, error));
                }
                Ok(Ok((counts, degraded))) => {
                    if degraded {
                        self.runs.add_warning(
                            &run_id,
                            format!("document {}: embedding degraded to fallback vector", index),
                        );
                    }
                    self.runs.record_document(&run_id, counts);
                    successes += 1;
                }
            }
        }

        if !*cancelled.borrow() {
            // A run with at least one processed document completes; one that
            // saw documents (or a failed pull) but zero successes fails. An
            // empty clean pull is a no-op sync and completes.
            let ok = successes > 0 || (total == 0 && failures == 0);
            self.runs.complete(&run_id, ok);
        }
        Ok(self.report(&run_id, batch.next_since))
    }

    /// Map, embed and merge one document
    async fn process_document(
        &self,
        scope: &WriteScope,
        doc: &Value,
        mapping: &SourceMapping,
        schema: &KbSchema,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<(MergeCounts, bool), DocError> {
        let mut mapped = apply_mapping(doc, mapping, schema)?;

        // Only the primary node carries an embedding, and only when its
        // mapped properties yield text
        let chunking = &schema.embedding.chunking;
        let mut degraded = false;
        if let Some(primary) = mapped.nodes.first_mut() {
            let texts = embedding::node_texts(&primary.props, chunking);
            if !texts.is_empty() {
                let outcome =
                    embedding::embed_node(embedder, chunking, &texts, self.config.embed_timeout)
                        .await;
                degraded = outcome.degraded;
                primary.embedding = Some(outcome.vector);
            }
        }

        let counts = self
            .store
            .merge_document(scope, &mapped.nodes, &mapped.edges)
            .await?;
        Ok((counts, degraded))
    }

    fn report(&self, run_id: &RunId, next_since: Option<String>) -> IngestReport {
        match self.runs.run(run_id) {
            Some(run) => IngestReport {
                run_id: run.run_id,
                state: run.state,
                processed: run.stats.documents_processed,
                created_nodes: run.stats.nodes_created,
                updated_nodes: run.stats.nodes_updated,
                created_rels: run.stats.relationships_created,
                updated_rels: run.stats.relationships_updated,
                errors: run.errors,
                warnings: run.warnings,
                next_since,
            },
            None => IngestReport {
                run_id: run_id.clone(),
                state: RunState::Failed,
                processed: 0,
                created_nodes: 0,
                updated_nodes: 0,
                created_rels: 0,
                updated_rels: 0,
                errors: Vec::new(),
                warnings: Vec::new(),
                next_since,
            },
        }
    }

    /// Cancel a run. Terminal runs are a no-op returning their state;
    /// unknown run ids return `None`.
    pub fn cancel_run(&self, run_id: &str) -> Option<RunState> {
        self.runs.cancel(&RunId::new(run_id))
    }

    /// Execute a read-only parameterized graph query scoped to a KB
    pub async fn search_graph(
        &self,
        kb_id: &str,
        query: &str,
        params: Option<Map<String, Value>>,
    ) -> Result<GraphRows, OrchestratorError> {
        let kb = KbId::new(kb_id);
        if !self.registry.kb_exists(&kb).await {
            return Err(OrchestratorError::UnknownKb(kb));
        }
        // Static rejection before any store I/O
        guard::ensure_read_only(query)?;
        Ok(self
            .store
            .read_query(&kb, query, params.unwrap_or_default())
            .await?)
    }

    /// Embed the query text and run a vector similarity search
    pub async fn semantic_search(
        &self,
        kb_id: &str,
        text: &str,
        top_k: usize,
        filters: Option<SearchFilters>,
    ) -> Result<Vec<SearchHit>, OrchestratorError> {
        let kb = KbId::new(kb_id);
        let entry = self
            .registry
            .schema(&kb)
            .await
            .ok_or_else(|| OrchestratorError::UnknownKb(kb.clone()))?;

        let embedder = self.embedders.get(&entry.schema.embedding.provider)?;
        let vector = tokio::time::timeout(self.config.embed_timeout, embedder.embed(text))
            .await
            .map_err(|_| EmbedError::Timeout)??;

        let hits = self
            .store
            .vector_search(&kb, &vector, top_k, &filters.unwrap_or_default())
            .await?;
        info!(%kb, top_k, hits = hits.len(), "semantic search");
        Ok(hits)
    }

    /// Current aggregate status of a KB
    pub async fn sync_status(&self, kb_id: &str) -> Result<KbStatus, OrchestratorError> {
        let kb = KbId::new(kb_id);
        if !self.registry.kb_exists(&kb).await {
            return Err(OrchestratorError::UnknownKb(kb));
        }
        let runs = self.runs.runs_for_kb(&kb);
        let total_nodes = self.store.count_nodes(&kb).await?;
        let total_relationships = self.store.count_relationships(&kb).await?;
        Ok(derive_status(
            &kb,
            &runs,
            total_nodes,
            total_relationships,
            chrono::Utc::now(),
        ))
    }

    /// Probe every registered source's connector health
    pub async fn source_health(&self, kb_id: &str) -> Result<Vec<(SourceId, bool)>, OrchestratorError> {
        let kb = KbId::new(kb_id);
        if !self.registry.kb_exists(&kb).await {
            return Err(OrchestratorError::UnknownKb(kb));
        }
        let mut results = Vec::new();
        for source in self.registry.sources(&kb).await {
            let healthy = match self.source.health(&source).await {
                Ok(()) => true,
                Err(error) => {
                    warn!(source_id = %source.source_id, "connector unhealthy: {}", error);
                    false
                }
            };
            results.push((source.source_id, healthy));
        }
        Ok(results)
    }
}
