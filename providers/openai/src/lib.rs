//! OpenAI embedding provider for GraphLoom

use async_trait::async_trait;
use graphloom_core::errors::EmbedError;
use graphloom_core::traits::{EmbedderFactory, EmbeddingProvider};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

mod config;
mod models;

pub use config::OpenAiConfig;
use models::{EmbeddingsRequest, EmbeddingsResponse};

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(4);

/// Default output dimensions of OpenAI embedding models
fn default_dim(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        "text-embedding-ada-002" => Some(1536),
        _ => None,
    }
}

/// OpenAI implementation of EmbeddingProvider
pub struct OpenAiEmbedder {
    client: Client,
    config: OpenAiConfig,
    name: String,
    dim: usize,
}

impl OpenAiEmbedder {
    /// Create a new OpenAI embedder. The model must either appear in the
    /// default dimension table or carry an explicit dimension override.
    pub fn new(config: OpenAiConfig) -> Result<Self, EmbedError> {
        if config.api_key.is_empty() {
            return Err(EmbedError::ConfigError("OpenAI API key is empty".to_string()));
        }
        let dim = config
            .dim
            .or_else(|| default_dim(&config.model))
            .ok_or_else(|| {
                EmbedError::ConfigError(format!(
                    "unknown output dimension for model '{}'; set one explicitly",
                    config.model
                ))
            })?;

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| EmbedError::ConfigError(format!("failed to create HTTP client: {}", e)))?;

        let name = format!("openai:{}", config.model);
        Ok(Self {
            client,
            config,
            name,
            dim,
        })
    }

    async fn post_embeddings(&self, input: Vec<String>) -> Result<EmbeddingsResponse, EmbedError> {
        let url = format!("{}/embeddings", self.config.api_base.trim_end_matches('/'));
        let request = EmbeddingsRequest {
            model: self.config.model.clone(),
            input,
        };

        let mut attempt: u32 = 0;
        loop {
            let error = match self
                .client
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json().await.map_err(|e| {
                            EmbedError::ResponseParse(format!("embeddings response: {}", e))
                        });
                    }
                    let body = response.text().await.unwrap_or_default();
                    let error = EmbedError::Api {
                        status: status.as_u16(),
                        body,
                    };
                    // 429 is worth retrying alongside server errors
                    if !status.is_server_error() && status.as_u16() != 429 {
                        return Err(error);
                    }
                    error
                }
                Err(e) if e.is_timeout() => EmbedError::Timeout,
                Err(e) => EmbedError::Network(e.to_string()),
            };

            if attempt >= self.config.max_retries {
                return Err(error);
            }
            let delay = BACKOFF_CAP.min(BACKOFF_BASE * 2u32.pow(attempt));
            warn!(model = %self.config.model, attempt, "embedding request failed, retrying: {}", error);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let response = self.post_embeddings(vec![text.to_string()]).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbedError::ResponseParse("no embedding in response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let response = self.post_embeddings(texts.to_vec()).await?;
        if response.data.len() != texts.len() {
            return Err(EmbedError::ResponseParse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            )));
        }
        // The API is documented to preserve order, but index is authoritative
        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        debug!(model = %self.config.model, batch = data.len(), "embedded batch");
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Factory resolving `openai:<model>` references
#[derive(Debug, Clone)]
pub struct OpenAiFactory {
    api_key: String,
    api_base: Option<String>,
}

impl OpenAiFactory {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: None,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }
}

impl EmbedderFactory for OpenAiFactory {
    fn create(&self, provider: &str) -> Result<Arc<dyn EmbeddingProvider>, EmbedError> {
        let model = provider
            .strip_prefix("openai:")
            .ok_or_else(|| EmbedError::UnknownProvider(provider.to_string()))?;
        let mut config = OpenAiConfig::new(self.api_key.clone(), model);
        if let Some(ref api_base) = self.api_base {
            config = config.with_api_base(api_base.clone());
        }
        Ok(Arc::new(OpenAiEmbedder::new(config)?))
    }
}
