//! Ollama embedding provider for GraphLoom

use async_trait::async_trait;
use graphloom_core::errors::EmbedError;
use graphloom_core::traits::{EmbedderFactory, EmbeddingProvider};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

mod config;
mod models;

pub use config::OllamaConfig;
use models::{EmbeddingsRequest, EmbeddingsResponse};

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(4);

/// Default output dimensions of well-known Ollama embedding models
fn default_dim(model: &str) -> Option<usize> {
    match model {
        "mxbai-embed-large" => Some(1024),
        "nomic-embed-text" => Some(768),
        "all-minilm" => Some(384),
        "snowflake-arctic-embed" => Some(1024),
        "bge-m3" => Some(1024),
        _ => None,
    }
}

/// Ollama implementation of EmbeddingProvider
pub struct OllamaEmbedder {
    client: Client,
    config: OllamaConfig,
    name: String,
    dim: usize,
}

impl OllamaEmbedder {
    /// Create a new Ollama embedder. The model must either appear in the
    /// default dimension table or carry an explicit dimension override.
    pub fn new(config: OllamaConfig) -> Result<Self, EmbedError> {
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

        let name = format!("ollama:{}", config.model);
        Ok(Self {
            client,
            config,
            name,
            dim,
        })
    }

    async fn post_embedding(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let url = format!(
            "{}/api/embeddings",
            self.config.base_url.trim_end_matches('/')
        );
        let request = EmbeddingsRequest {
            model: self.config.model.clone(),
            prompt: text.to_string(),
        };

        let mut attempt: u32 = 0;
        loop {
            let error = match self.client.post(&url).json(&request).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let payload: EmbeddingsResponse = response.json().await.map_err(|e| {
                            EmbedError::ResponseParse(format!("embeddings response: {}", e))
                        })?;
                        return Ok(payload.embedding);
                    }
                    let body = response.text().await.unwrap_or_default();
                    let error = EmbedError::Api {
                        status: status.as_u16(),
                        body,
                    };
                    if !status.is_server_error() {
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
impl EmbeddingProvider for OllamaEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let vector = self.post_embedding(text).await?;
        debug!(model = %self.config.model, len = vector.len(), "embedded text");
        Ok(vector)
    }
}

/// Factory resolving `ollama:<model>` references
#[derive(Debug, Clone, Default)]
pub struct OllamaFactory {
    /// Base URL applied to every created embedder; None keeps the default
    pub base_url: Option<String>,
}

impl OllamaFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
        }
    }
}

impl EmbedderFactory for OllamaFactory {
    fn create(&self, provider: &str) -> Result<Arc<dyn EmbeddingProvider>, EmbedError> {
        let model = provider
            .strip_prefix("ollama:")
            .ok_or_else(|| EmbedError::UnknownProvider(provider.to_string()))?;
        let mut config = OllamaConfig::new(model);
        if let Some(ref base_url) = self.base_url {
            config = config.with_base_url(base_url.clone());
        }
        Ok(Arc::new(OllamaEmbedder::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_dimension_resolution() {
        let embedder = OllamaEmbedder::new(OllamaConfig::new("mxbai-embed-large")).unwrap();
        assert_eq!(embedder.dim(), 1024);
        assert_eq!(embedder.name(), "ollama:mxbai-embed-large");

        assert!(OllamaEmbedder::new(OllamaConfig::new("mystery-model")).is_err());
        let overridden =
            OllamaEmbedder::new(OllamaConfig::new("mystery-model").with_dim(512)).unwrap();
        assert_eq!(overridden.dim(), 512);
    }

    #[tokio::test]
    async fn test_embed_posts_model_and_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .and(body_partial_json(serde_json::json!({
                "model": "nomic-embed-text",
                "prompt": "hello"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embedding": [0.1, 0.2, 0.3]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = OllamaEmbedder::new(
            OllamaConfig::new("nomic-embed-text").with_base_url(server.uri()),
        )
        .unwrap();
        let vector = embedder.embed("hello").await.unwrap();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_server_errors_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"embedding": [1.0]})),
            )
            .mount(&server)
            .await;

        let embedder = OllamaEmbedder::new(
            OllamaConfig::new("nomic-embed-text").with_base_url(server.uri()),
        )
        .unwrap();
        assert_eq!(embedder.embed("x").await.unwrap(), vec![1.0]);
    }

    #[tokio::test]
    async fn test_client_error_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = OllamaEmbedder::new(
            OllamaConfig::new("nomic-embed-text").with_base_url(server.uri()),
        )
        .unwrap();
        match embedder.embed("x").await.unwrap_err() {
            EmbedError::Api { status, body } => {
                assert_eq!(status, 404);
                assert!(body.contains("model not found"));
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[test]
    fn test_factory_rejects_foreign_refs() {
        let factory = OllamaFactory::default();
        assert!(factory.create("ollama:mxbai-embed-large").is_ok());
        assert!(matches!(
            factory.create("openai:text-embedding-3-small"),
            Err(EmbedError::UnknownProvider(_))
        ));
    }
}
