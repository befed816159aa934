//! In-process registry of knowledge bases: their versioned schema and their
//! sources. Guarded by a readers-writer lock; ingestion paths only read.

use crate::errors::{OrchestratorError, ValidationIssue};
use crate::schema::KbSchema;
use crate::types::{KbId, SourceConfig, SourceId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// The stored, versioned schema of a knowledge base
#[derive(Debug, Clone)]
pub struct SchemaEntry {
    pub schema: Arc<KbSchema>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Advisory warnings captured at registration
    pub warnings: Vec<ValidationIssue>,
    /// Vector dimension of the KB's embedding provider
    pub vector_dim: usize,
}

#[derive(Debug)]
struct KbEntry {
    schema: SchemaEntry,
    sources: HashMap<SourceId, SourceConfig>,
}

/// Registry of all knowledge bases owned by this orchestrator
#[derive(Debug, Default)]
pub struct Registry {
    inner: RwLock<HashMap<KbId, KbEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a schema, creating the KB on first registration.
    ///
    /// Re-registering a normalized-equal schema keeps the current version;
    /// any real change bumps it and refreshes `updated_at`.
    pub async fn store_schema(
        &self,
        kb_id: &KbId,
        schema: KbSchema,
        warnings: Vec<ValidationIssue>,
        vector_dim: usize,
    ) -> SchemaEntry {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        match inner.get_mut(kb_id) {
            Some(entry) => {
                if entry.schema.schema.is_equivalent(&schema) {
                    debug!(%kb_id, version = entry.schema.version, "schema unchanged");
                    entry.schema.warnings = warnings;
                    entry.schema.clone()
                } else {
                    entry.schema = SchemaEntry {
                        schema: Arc::new(schema),
                        version: entry.schema.version + 1,
                        created_at: entry.schema.created_at,
                        updated_at: now,
                        warnings,
                        vector_dim,
                    };
                    info!(%kb_id, version = entry.schema.version, "schema updated");
                    entry.schema.clone()
                }
            }
            None => {
                let entry = KbEntry {
                    schema: SchemaEntry {
                        schema: Arc::new(schema),
                        version: 1,
                        created_at: now,
                        updated_at: now,
                        warnings,
                        vector_dim,
                    },
                    sources: HashMap::new(),
                };
                info!(%kb_id, "knowledge base created");
                let stored = entry.schema.clone();
                inner.insert(kb_id.clone(), entry);
                stored
            }
        }
    }

    pub async fn kb_exists(&self, kb_id: &KbId) -> bool {
        self.inner.read().await.contains_key(kb_id)
    }

    pub async fn schema(&self, kb_id: &KbId) -> Option<SchemaEntry> {
        self.inner.read().await.get(kb_id).map(|e| e.schema.clone())
    }

    /// Register or replace a source. The KB must exist and the mapping name
    /// must resolve inside its schema.
    pub async fn add_source(&self, config: SourceConfig) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .get_mut(&config.kb_id)
            .ok_or_else(|| OrchestratorError::UnknownKb(config.kb_id.clone()))?;

        if entry.schema.schema.mapping(&config.mapping_name).is_none() {
            return Err(OrchestratorError::UnknownMapping {
                kb_id: config.kb_id.clone(),
                mapping_name: config.mapping_name.clone(),
            });
        }

        debug!(kb_id = %config.kb_id, source_id = %config.source_id, "source registered");
        entry.sources.insert(config.source_id.clone(), config);
        Ok(())
    }

    pub async fn source(&self, kb_id: &KbId, source_id: &SourceId) -> Option<SourceConfig> {
        self.inner
            .read()
            .await
            .get(kb_id)
            .and_then(|e| e.sources.get(source_id))
            .cloned()
    }

    pub async fn sources(&self, kb_id: &KbId) -> Vec<SourceConfig> {
        self.inner
            .read()
            .await
            .get(kb_id)
            .map(|e| e.sources.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::compile;

    const YAML: &str = r#"
kb_id: demo
embedding:
  provider: "ollama:mxbai-embed-large"
  chunking:
    strategy: paragraph
    max_tokens: 800
nodes:
  - label: Document
    key: id
    props: [id, title]
mappings:
  sources:
    - source_id: src1
      document_type: article
      extract:
        node: Document
        assign:
          id: "$.id"
"#;

    fn source(kb: &str, id: &str, mapping: &str) -> SourceConfig {
        SourceConfig {
            kb_id: KbId::new(kb),
            source_id: SourceId::new(id),
            connector_url: "http://localhost:9000".to_string(),
            auth_ref: None,
            mapping_name: mapping.to_string(),
        }
    }

    #[tokio::test]
    async fn test_version_bumps_only_on_change() {
        let registry = Registry::new();
        let kb = KbId::new("demo");
        let (schema, _) = compile(YAML).unwrap();

        let v1 = registry.store_schema(&kb, schema.clone(), vec![], 1024).await;
        assert_eq!(v1.version, 1);

        // Identical schema: no bump
        let again = registry.store_schema(&kb, schema, vec![], 1024).await;
        assert_eq!(again.version, 1);

        // Changed schema: bump
        let (changed, _) = compile(&YAML.replace("max_tokens: 800", "max_tokens: 900")).unwrap();
        let v2 = registry.store_schema(&kb, changed, vec![], 1024).await;
        assert_eq!(v2.version, 2);
        assert!(v2.updated_at >= v1.updated_at);
    }

    #[tokio::test]
    async fn test_add_source_validates_kb_and_mapping() {
        let registry = Registry::new();
        let kb = KbId::new("demo");
        let (schema, _) = compile(YAML).unwrap();
        registry.store_schema(&kb, schema, vec![], 1024).await;

        assert!(matches!(
            registry.add_source(source("ghost", "src1", "src1")).await,
            Err(OrchestratorError::UnknownKb(_))
        ));
        assert!(matches!(
            registry.add_source(source("demo", "src1", "nope")).await,
            Err(OrchestratorError::UnknownMapping { .. })
        ));

        registry.add_source(source("demo", "src1", "src1")).await.unwrap();
        assert!(registry
            .source(&kb, &SourceId::new("src1"))
            .await
            .is_some());
    }
}
