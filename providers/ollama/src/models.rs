//! Ollama API data models

use serde::{Deserialize, Serialize};

/// Ollama embeddings request
#[derive(Debug, Serialize)]
pub struct EmbeddingsRequest {
    pub model: String,
    pub prompt: String,
}

/// Ollama embeddings response
#[derive(Debug, Deserialize)]
pub struct EmbeddingsResponse {
    pub embedding: Vec<f32>,
}
