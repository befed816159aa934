//! Startup configuration for the orchestrator

use std::time::Duration;

/// Configuration recognized at startup, overridable via environment
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Graph database connection URI (`GRAPH_URI`)
    pub graph_uri: String,
    /// Graph database user (`GRAPH_USER`)
    pub graph_user: Option<String>,
    /// Graph database password (`GRAPH_PASSWORD`)
    pub graph_password: Option<String>,
    /// Graph database name (`GRAPH_DATABASE`)
    pub graph_database: Option<String>,
    /// Concurrent embedding calls per provider (`EMBEDDING_POOL_MAX`)
    pub embedding_pool_max: usize,
    /// Timeout of one connector pull (`CONNECTOR_TIMEOUT_MS`)
    pub connector_timeout: Duration,
    /// Timeout of one embedding call (`EMBED_TIMEOUT_MS`)
    pub embed_timeout: Duration,
    /// Soft timeout of one document's embed+merge (`DOC_TIMEOUT_MS`)
    pub doc_timeout: Duration,
    /// Terminal runs retained in memory per KB (`RUN_HISTORY_MAX`)
    pub run_history_max: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            graph_uri: "bolt://localhost:7687".to_string(),
            graph_user: None,
            graph_password: None,
            graph_database: None,
            embedding_pool_max: 8,
            connector_timeout: Duration::from_secs(60),
            embed_timeout: Duration::from_secs(30),
            doc_timeout: Duration::from_secs(120),
            run_history_max: 100,
        }
    }
}

impl OrchestratorConfig {
    /// Read configuration from the environment, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            graph_uri: env_string("GRAPH_URI").unwrap_or(defaults.graph_uri),
            graph_user: env_string("GRAPH_USER"),
            graph_password: env_string("GRAPH_PASSWORD"),
            graph_database: env_string("GRAPH_DATABASE"),
            embedding_pool_max: env_parse("EMBEDDING_POOL_MAX")
                .unwrap_or(defaults.embedding_pool_max),
            connector_timeout: env_millis("CONNECTOR_TIMEOUT_MS")
                .unwrap_or(defaults.connector_timeout),
            embed_timeout: env_millis("EMBED_TIMEOUT_MS").unwrap_or(defaults.embed_timeout),
            doc_timeout: env_millis("DOC_TIMEOUT_MS").unwrap_or(defaults.doc_timeout),
            run_history_max: env_parse("RUN_HISTORY_MAX").unwrap_or(defaults.run_history_max),
        }
    }

    pub fn with_embedding_pool_max(mut self, max: usize) -> Self {
        self.embedding_pool_max = max.max(1);
        self
    }

    pub fn with_doc_timeout(mut self, timeout: Duration) -> Self {
        self.doc_timeout = timeout;
        self
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}
