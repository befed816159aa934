//! Configuration for the Ollama embedding provider

/// Ollama API configuration
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Model to use (e.g. "mxbai-embed-large")
    pub model: String,
    /// API base URL
    pub base_url: String,
    /// Output dimension override for models not in the default table
    pub dim: Option<usize>,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// Maximum retries for failed requests
    pub max_retries: u32,
}

impl OllamaConfig {
    /// Create a new config for the given model
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            base_url: "http://localhost:11434".to_string(),
            dim: None,
            timeout_ms: 30_000,
            max_retries: 3,
        }
    }

    /// Set the API base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the output dimension
    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = Some(dim);
        self
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set maximum retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}
