//! End-to-end ingestion scenarios: orchestrator + in-memory store with a
//! deterministic embedder and a scripted document source.

use async_trait::async_trait;
use graphloom_adapter_in_memory::InMemoryStore;
use graphloom_core::config::OrchestratorConfig;
use graphloom_core::embedding::fallback_vector;
use graphloom_core::errors::{EmbedError, OrchestratorError, SourceError};
use graphloom_core::orchestrator::Orchestrator;
use graphloom_core::runs::RunState;
use graphloom_core::status::KbHealth;
use graphloom_core::traits::{DocumentSource, EmbedderFactory, EmbeddingProvider};
use graphloom_core::types::{KbId, PullBatch, SearchFilters, SourceConfig};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SCHEMA: &str = r#"
kb_id: demo
embedding:
  provider: "ollama:mxbai-embed-large"
  chunking:
    strategy: paragraph
    max_tokens: 800
    overlap: 0
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

fn doc(id: &str, title: &str, author: &str, email: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "content": format!("content of {}", id),
        "author": {"name": author, "email": email}
    })
}

fn two_docs() -> Vec<Value> {
    vec![doc("d1", "T1", "A", "a@x"), doc("d2", "T2", "B", "b@x")]
}

/// Source returning pre-scripted batches, one per pull
struct ScriptedSource {
    batches: Mutex<VecDeque<Vec<Value>>>,
    delay: Duration,
}

impl ScriptedSource {
    fn new(batches: Vec<Vec<Value>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
            delay: Duration::ZERO,
        }
    }

    fn slow(batches: Vec<Vec<Value>>, delay: Duration) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
            delay,
        }
    }
}

#[async_trait]
impl DocumentSource for ScriptedSource {
    async fn pull(&self, _: &SourceConfig, _: Option<&str>) -> Result<PullBatch, SourceError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let documents = self.batches.lock().unwrap().pop_front().unwrap_or_default();
        Ok(PullBatch {
            documents,
            next_since: Some("2024-01-02T00:00:00Z".to_string()),
        })
    }

    async fn health(&self, _: &SourceConfig) -> Result<(), SourceError> {
        Ok(())
    }
}

/// Deterministic embedder: the hash-derived vector family, so equal text
/// means equal vectors and cosine similarity 1.0
struct HashEmbedder {
    name: String,
    dim: usize,
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(fallback_vector(text, self.dim))
    }
}

struct HashFactory;

impl EmbedderFactory for HashFactory {
    fn create(&self, provider: &str) -> Result<Arc<dyn EmbeddingProvider>, EmbedError> {
        // Families differ in dimension so provider changes are observable
        let dim = if provider.starts_with("openai:") { 16 } else { 8 };
        Ok(Arc::new(HashEmbedder {
            name: provider.to_string(),
            dim,
        }))
    }
}

fn setup(source: ScriptedSource) -> (Arc<Orchestrator>, Arc<InMemoryStore>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(source),
        Arc::new(HashFactory),
        OrchestratorConfig::default(),
    );
    (Arc::new(orchestrator), store)
}

async fn register_demo(orchestrator: &Orchestrator) {
    let receipt = orchestrator.register_schema("demo", SCHEMA).await.unwrap();
    assert_eq!(receipt.schema_version, 1);
    assert_eq!(receipt.nodes_count, 2);
    assert_eq!(receipt.rels_count, 1);
    assert_eq!(receipt.sources_count, 1);
    orchestrator
        .add_source("demo", "src1", "http://localhost:9000", None, "src1")
        .await
        .unwrap();
}

#[tokio::test]
async fn s1_initial_ingest_creates_graph() {
    let (orchestrator, store) = setup(ScriptedSource::new(vec![two_docs()]));
    register_demo(&orchestrator).await;

    let report = orchestrator.ingest("demo", "src1", None).await.unwrap();
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.processed, 2);
    assert_eq!(report.created_nodes, 4);
    assert_eq!(report.created_rels, 2);
    assert!(report.errors.is_empty());
    assert_eq!(report.next_since.as_deref(), Some("2024-01-02T00:00:00Z"));

    let kb = KbId::new("demo");
    assert_eq!(store.stats(&kb).await, (4, 2));

    // Provenance is complete on nodes and edges
    let props = store.node_props(&kb, "Person", "a@x").await.unwrap();
    for field in ["kb_id", "source_id", "run_id", "updated_at"] {
        assert!(
            props.get(field).map_or(false, |v| !v.is_null()),
            "missing provenance field {}",
            field
        );
    }
    assert_eq!(props.get("name"), Some(&json!("A")));
    let (source_id, run_id, _) = store
        .edge_provenance(&kb, "AUTHORED_BY", "d1", "a@x")
        .await
        .unwrap();
    assert_eq!(source_id, "src1");
    assert_eq!(run_id, report.run_id.as_str());

    // The primary node got an embedding; secondary nodes did not
    assert!(store.node_embedding(&kb, "d1").await.is_some());
    assert!(store.node_embedding(&kb, "a@x").await.is_none());
}

#[tokio::test]
async fn s2_replaying_identical_documents_creates_nothing() {
    let (orchestrator, store) = setup(ScriptedSource::new(vec![two_docs(), two_docs()]));
    register_demo(&orchestrator).await;
    let kb = KbId::new("demo");

    let first = orchestrator.ingest("demo", "src1", None).await.unwrap();
    let (_, _, updated_after_first) = store
        .edge_provenance(&kb, "AUTHORED_BY", "d1", "a@x")
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = orchestrator.ingest("demo", "src1", None).await.unwrap();

    assert_eq!(second.created_nodes, 0);
    assert_eq!(second.created_rels, 0);
    assert_eq!(second.updated_nodes, 4);
    assert_eq!(second.updated_rels, 2);
    assert_ne!(first.run_id, second.run_id);

    // Every touched entity carries the new run id with updated_at advanced
    for key in ["d1", "d2", "a@x", "b@x"] {
        let label = if key.starts_with('d') { "Document" } else { "Person" };
        let props = store.node_props(&kb, label, key).await.unwrap();
        assert_eq!(props.get("run_id"), Some(&json!(second.run_id.as_str())));
    }
    let (_, edge_run, updated_after_second) = store
        .edge_provenance(&kb, "AUTHORED_BY", "d1", "a@x")
        .await
        .unwrap();
    assert_eq!(edge_run, second.run_id.as_str());
    assert!(updated_after_second > updated_after_first);
}

#[tokio::test]
async fn s3_updated_document_overwrites_without_duplicates() {
    let mut updated = two_docs();
    updated[0] = doc("d1", "T1-updated", "A", "a@x");
    let (orchestrator, store) = setup(ScriptedSource::new(vec![two_docs(), updated]));
    register_demo(&orchestrator).await;

    orchestrator.ingest("demo", "src1", None).await.unwrap();
    let second = orchestrator.ingest("demo", "src1", None).await.unwrap();

    assert_eq!(second.created_nodes, 0);
    assert_eq!(second.created_rels, 0);

    let kb = KbId::new("demo");
    assert_eq!(store.stats(&kb).await, (4, 2));
    let props = store.node_props(&kb, "Document", "d1").await.unwrap();
    assert_eq!(props.get("title"), Some(&json!("T1-updated")));
}

#[tokio::test]
async fn s4_write_queries_are_rejected_before_io() {
    let (orchestrator, store) = setup(ScriptedSource::new(vec![two_docs()]));
    register_demo(&orchestrator).await;
    orchestrator.ingest("demo", "src1", None).await.unwrap();

    let kb = KbId::new("demo");
    let before = store.stats(&kb).await;
    let err = orchestrator
        .search_graph("demo", "MATCH (n) DETACH DELETE n", None)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::WriteForbidden(_)));
    assert_eq!(store.stats(&kb).await, before);
}

#[tokio::test]
async fn s5_concurrent_ingests_yield_one_run_and_one_conflict() {
    let (orchestrator, _) = setup(ScriptedSource::slow(
        vec![two_docs(), two_docs()],
        Duration::from_millis(300),
    ));
    register_demo(&orchestrator).await;

    let a = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.ingest("demo", "src1", None).await })
    };
    let b = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.ingest("demo", "src1", None).await })
    };

    let mut accepted = 0;
    let mut conflicts = 0;
    for outcome in [a.await.unwrap(), b.await.unwrap()] {
        match outcome {
            Ok(_) => accepted += 1,
            Err(OrchestratorError::Conflict { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(conflicts, 1);
}

#[tokio::test]
async fn s6_unknown_label_names_offender_and_candidate() {
    let (orchestrator, _) = setup(ScriptedSource::new(vec![]));
    let bad = SCHEMA.replace("    from: Document\n", "    from: Doc\n");

    match orchestrator.register_schema("demo", &bad).await.unwrap_err() {
        OrchestratorError::SchemaInvalid(report) => {
            let issue = report
                .errors
                .iter()
                .find(|e| e.message.contains("'Doc'"))
                .expect("expected an error naming 'Doc'");
            assert_eq!(issue.suggestion.as_deref(), Some("Document"));
        }
        other => panic!("expected SchemaInvalid, got {:?}", other),
    }
}

#[tokio::test]
async fn cancel_is_idempotent_and_stops_the_run() {
    let (orchestrator, _) = setup(ScriptedSource::slow(
        vec![two_docs()],
        Duration::from_millis(500),
    ));
    register_demo(&orchestrator).await;

    let ingest = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.ingest("demo", "src1", None).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status = orchestrator.sync_status("demo").await.unwrap();
    let active = status
        .sources
        .iter()
        .find(|s| s.state == RunState::Running)
        .expect("run should be active");
    let run_id = active.run_id.as_str().to_string();

    assert_eq!(orchestrator.cancel_run(&run_id), Some(RunState::Cancelled));
    // Second cancel: no-op on a terminal run, same answer
    assert_eq!(orchestrator.cancel_run(&run_id), Some(RunState::Cancelled));

    let report = ingest.await.unwrap().unwrap();
    assert_eq!(report.state, RunState::Cancelled);
    assert_eq!(report.processed, 0);
}

#[tokio::test]
async fn semantic_search_finds_ingested_documents() {
    let (orchestrator, _) = setup(ScriptedSource::new(vec![two_docs()]));
    register_demo(&orchestrator).await;
    orchestrator.ingest("demo", "src1", None).await.unwrap();

    // The stored vector embeds the packed text of d1's string properties
    let query = "content of d1 d1 T1";
    let hits = orchestrator
        .semantic_search("demo", query, 5, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].node.get("key"), Some(&json!("d1")));
    assert!(hits[0].score > hits[1].score);
    assert!((hits[0].score - 1.0).abs() < 1e-5);

    let filters = SearchFilters {
        labels: vec!["Document".to_string()],
        properties: {
            let mut m = Map::new();
            m.insert("title".to_string(), json!("T2"));
            m
        },
    };
    let filtered = orchestrator
        .semantic_search("demo", query, 5, Some(filters))
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].node.get("key"), Some(&json!("d2")));
}

#[tokio::test]
async fn per_document_failures_are_recorded_not_fatal() {
    let batch = vec![json!({"title": "no id field"}), doc("d1", "T1", "A", "a@x")];
    let (orchestrator, store) = setup(ScriptedSource::new(vec![batch]));
    register_demo(&orchestrator).await;

    let report = orchestrator.ingest("demo", "src1", None).await.unwrap();
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.processed, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].message.contains("document 0"));
    assert_eq!(store.stats(&KbId::new("demo")).await, (2, 1));
}

#[tokio::test]
async fn all_documents_failing_fails_the_run() {
    let batch = vec![json!({"x": 1}), json!({"y": 2})];
    let (orchestrator, _) = setup(ScriptedSource::new(vec![batch]));
    register_demo(&orchestrator).await;

    let report = orchestrator.ingest("demo", "src1", None).await.unwrap();
    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.processed, 0);
    assert_eq!(report.errors.len(), 2);

    let status = orchestrator.sync_status("demo").await.unwrap();
    assert_eq!(status.health, KbHealth::Error);
    assert!(status.last_error.is_some());
}

#[tokio::test]
async fn empty_pull_completes_as_noop_sync() {
    let (orchestrator, _) = setup(ScriptedSource::new(vec![vec![]]));
    register_demo(&orchestrator).await;

    let report = orchestrator.ingest("demo", "src1", None).await.unwrap();
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.processed, 0);
}

#[tokio::test]
async fn status_reflects_successful_sync() {
    let (orchestrator, _) = setup(ScriptedSource::new(vec![two_docs()]));
    register_demo(&orchestrator).await;
    orchestrator.ingest("demo", "src1", None).await.unwrap();

    let status = orchestrator.sync_status("demo").await.unwrap();
    assert_eq!(status.health, KbHealth::Healthy);
    assert_eq!(status.total_nodes, 4);
    assert_eq!(status.total_relationships, 2);
    assert!(status.last_successful_sync.is_some());
    assert!(status.data_freshness_hours.unwrap() < 1.0);
    assert!(status.avg_ingestion_time_ms.is_some());
    assert_eq!(status.sources.len(), 1);
    assert_eq!(status.sources[0].state, RunState::Completed);
}

#[tokio::test]
async fn unknown_ids_surface_verbatim() {
    let (orchestrator, _) = setup(ScriptedSource::new(vec![]));
    register_demo(&orchestrator).await;

    assert!(matches!(
        orchestrator.ingest("ghost", "src1", None).await,
        Err(OrchestratorError::UnknownKb(_))
    ));
    assert!(matches!(
        orchestrator.ingest("demo", "nope", None).await,
        Err(OrchestratorError::UnknownSource { .. })
    ));
    assert!(matches!(
        orchestrator.add_source("demo", "src2", "http://x", None, "nope").await,
        Err(OrchestratorError::UnknownMapping { .. })
    ));
    assert!(matches!(
        orchestrator.semantic_search("ghost", "q", 5, None).await,
        Err(OrchestratorError::UnknownKb(_))
    ));
    assert!(matches!(
        orchestrator.sync_status("ghost").await,
        Err(OrchestratorError::UnknownKb(_))
    ));
}

#[tokio::test]
async fn provider_change_with_different_dimension_is_rejected() {
    let (orchestrator, _) = setup(ScriptedSource::new(vec![]));
    register_demo(&orchestrator).await;

    // Same schema except the provider family: dimensions 8 -> 16
    let changed = SCHEMA.replace("ollama:mxbai-embed-large", "openai:text-embedding-3-small");
    match orchestrator.register_schema("demo", &changed).await.unwrap_err() {
        OrchestratorError::SchemaInvalid(report) => {
            assert!(report.errors.iter().any(|e| e.message.contains("dimension")));
        }
        other => panic!("expected SchemaInvalid, got {:?}", other),
    }
}

#[tokio::test]
async fn reregistering_identical_schema_keeps_version() {
    let (orchestrator, _) = setup(ScriptedSource::new(vec![]));
    register_demo(&orchestrator).await;

    let again = orchestrator.register_schema("demo", SCHEMA).await.unwrap();
    assert_eq!(again.schema_version, 1);

    let changed = SCHEMA.replace("max_tokens: 800", "max_tokens: 900");
    let bumped = orchestrator.register_schema("demo", &changed).await.unwrap();
    assert_eq!(bumped.schema_version, 2);
}
