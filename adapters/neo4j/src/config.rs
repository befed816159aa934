//! Configuration types for the Neo4j adapter

use graphloom_core::config::OrchestratorConfig;

/// Configuration for the Neo4j connection
#[derive(Debug, Clone)]
pub struct Neo4jConfig {
    /// Connection URI (e.g. bolt://localhost:7687)
    pub uri: String,
    /// Username for authentication
    pub user: Option<String>,
    /// Password for authentication
    pub password: Option<String>,
    /// Database name, when not the default
    pub database: Option<String>,
    /// Maximum number of concurrent transactions
    pub max_connections: usize,
    /// How long to wait for a free connection before failing with Busy
    pub pool_wait_ms: u64,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: Some("neo4j".to_string()),
            password: Some("neo4j".to_string()),
            database: None,
            max_connections: 10,
            pool_wait_ms: 30_000,
        }
    }
}

impl Neo4jConfig {
    /// Create a new config with the given URI
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }

    /// Derive a connection config from the orchestrator's startup settings
    pub fn from_orchestrator(config: &OrchestratorConfig) -> Self {
        Self {
            uri: config.graph_uri.clone(),
            user: config.graph_user.clone(),
            password: config.graph_password.clone(),
            database: config.graph_database.clone(),
            ..Default::default()
        }
    }

    /// Set the authentication credentials
    pub fn with_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Set the connection pool size
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    /// Set the pool acquisition timeout
    pub fn with_pool_wait(mut self, pool_wait_ms: u64) -> Self {
        self.pool_wait_ms = pool_wait_ms;
        self
    }
}
