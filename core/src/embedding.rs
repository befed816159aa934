//! Embedding pipeline: provider references, text chunking, the deterministic
//! degraded-mode fallback vector, and concurrency throttling.
//!
//! Providers themselves live in the provider crates; this module owns
//! everything the orchestrator does around them.

use crate::errors::EmbedError;
use crate::schema::{ChunkStrategy, ChunkingSpec};
use crate::traits::{EmbedderFactory, EmbeddingProvider};
use async_trait::async_trait;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

/// Embedding provider family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderFamily {
    Ollama,
    OpenAi,
}

impl std::fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderFamily::Ollama => write!(f, "ollama"),
            ProviderFamily::OpenAi => write!(f, "openai"),
        }
    }
}

/// Parsed `family:model` provider reference from a schema
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderRef {
    pub family: ProviderFamily,
    pub model: String,
}

impl std::fmt::Display for ProviderRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.family, self.model)
    }
}

impl Serialize for ProviderRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl std::str::FromStr for ProviderRef {
    type Err = EmbedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (family, model) = s
            .split_once(':')
            .ok_or_else(|| EmbedError::UnknownProvider(s.to_string()))?;
        let family = match family {
            "ollama" => ProviderFamily::Ollama,
            "openai" => ProviderFamily::OpenAi,
            _ => return Err(EmbedError::UnknownProvider(s.to_string())),
        };
        if model.is_empty() {
            return Err(EmbedError::UnknownProvider(s.to_string()));
        }
        Ok(Self {
            family,
            model: model.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Chunking
// ---------------------------------------------------------------------------

/// Collect the text(s) to embed for a node's properties.
///
/// `by_fields` yields one text per configured field; every other strategy
/// concatenates the string-valued properties (sorted property order) into a
/// single text. An empty result means the node has nothing to embed.
pub fn node_texts(props: &Map<String, Value>, spec: &ChunkingSpec) -> Vec<String> {
    match spec.strategy {
        ChunkStrategy::ByFields => spec
            .fields
            .iter()
            .filter_map(|field| props.get(field).and_then(Value::as_str))
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .collect(),
        _ => {
            let joined = props
                .values()
                .filter_map(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .collect::<Vec<_>>()
                .join("\n\n");
            if joined.is_empty() {
                Vec::new()
            } else {
                vec![joined]
            }
        }
    }
}

/// Split a text into chunks of at most `max_tokens` approximate tokens
/// (whitespace-separated words), packing boundary units and carrying
/// `overlap` words between consecutive chunks.
pub fn chunk_text(text: &str, spec: &ChunkingSpec) -> Vec<String> {
    let max = (spec.max_tokens as usize).max(1);
    // An overlap as large as the window would never make progress
    let overlap = (spec.overlap as usize).min(max / 2);

    let units = split_units(text, spec.strategy);
    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();

    let flush = |current: &mut Vec<String>, chunks: &mut Vec<String>| {
        if current.is_empty() {
            return;
        }
        chunks.push(current.join(" "));
        let tail_from = current.len().saturating_sub(overlap);
        *current = current.split_off(tail_from);
    };

    for unit in units {
        let words: Vec<&str> = unit.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }
        if !current.is_empty() && current.len() + words.len() > max {
            flush(&mut current, &mut chunks);
        }
        for word in words {
            current.push(word.to_string());
            if current.len() >= max {
                flush(&mut current, &mut chunks);
            }
        }
    }
    // The overlap tail alone is not a new chunk
    if !current.is_empty() && (chunks.is_empty() || current.len() > overlap) {
        chunks.push(current.join(" "));
    }
    chunks
}

fn split_units(text: &str, strategy: ChunkStrategy) -> Vec<&str> {
    match strategy {
        ChunkStrategy::ByHeadings => {
            let mut units = Vec::new();
            let mut start = 0;
            for (offset, line) in text.lines().map(|l| (line_offset(text, l), l)) {
                if line.trim_start().starts_with('#') && offset > start {
                    units.push(&text[start..offset]);
                    start = offset;
                }
            }
            units.push(&text[start..]);
            units
        }
        ChunkStrategy::Sentence => split_sentences(text),
        // by_fields texts arrive pre-separated; pack them like paragraphs
        ChunkStrategy::Paragraph | ChunkStrategy::ByFields => text.split("\n\n").collect(),
    }
}

fn line_offset(text: &str, line: &str) -> usize {
    line.as_ptr() as usize - text.as_ptr() as usize
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut units = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if matches!(b, b'.' | b'!' | b'?') {
            let end = i + 1;
            if end > start {
                units.push(&text[start..end]);
            }
            start = end;
        }
    }
    if start < text.len() {
        units.push(&text[start..]);
    }
    units
}

// ---------------------------------------------------------------------------
// Degraded-mode fallback
// ---------------------------------------------------------------------------

/// Deterministic pseudo-random unit vector derived from a hash of the input.
///
/// Used when a provider keeps failing after retries: ingestion completes and
/// the affected records simply rank low in similarity search. FNV-1a seeds a
/// splitmix64 stream so the output is stable across processes and platforms.
pub fn fallback_vector(text: &str, dim: usize) -> Vec<f32> {
    let mut state = fnv1a(text.as_bytes());
    let mut vector: Vec<f32> = (0..dim)
        .map(|_| {
            state = splitmix64(state);
            ((state >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0) as f32
        })
        .collect();
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn splitmix64(state: u64) -> u64 {
    let mut z = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

// ---------------------------------------------------------------------------
// Node embedding
// ---------------------------------------------------------------------------

/// Outcome of embedding one node's text
#[derive(Debug, Clone)]
pub struct EmbedOutcome {
    pub vector: Vec<f32>,
    /// True when the provider failed and the fallback vector was used
    pub degraded: bool,
}

/// Embed the node texts: chunk each, embed all chunks, mean-pool into the
/// single stored vector. Provider failure (after its own retries) degrades to
/// the fallback vector instead of failing the document.
pub async fn embed_node(
    provider: &dyn EmbeddingProvider,
    spec: &ChunkingSpec,
    texts: &[String],
    timeout: Duration,
) -> EmbedOutcome {
    let chunks: Vec<String> = texts
        .iter()
        .flat_map(|text| chunk_text(text, spec))
        .collect();
    let full_text = texts.join("\n\n");
    if chunks.is_empty() {
        return EmbedOutcome {
            vector: fallback_vector(&full_text, provider.dim()),
            degraded: true,
        };
    }

    match tokio::time::timeout(timeout, provider.embed_batch(&chunks)).await {
        Ok(Ok(vectors)) if !vectors.is_empty() => EmbedOutcome {
            vector: mean_pool(&vectors, provider.dim()),
            degraded: false,
        },
        Ok(Ok(_)) | Ok(Err(_)) | Err(_) => {
            warn!(
                provider = provider.name(),
                "embedding degraded to fallback vector"
            );
            EmbedOutcome {
                vector: fallback_vector(&full_text, provider.dim()),
                degraded: true,
            }
        }
    }
}

fn mean_pool(vectors: &[Vec<f32>], dim: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; dim];
    let mut count = 0usize;
    for vector in vectors {
        if vector.len() != dim {
            continue;
        }
        for (slot, x) in pooled.iter_mut().zip(vector) {
            *slot += x;
        }
        count += 1;
    }
    if count > 0 {
        for slot in &mut pooled {
            *slot /= count as f32;
        }
    }
    pooled
}

// ---------------------------------------------------------------------------
// Throttling
// ---------------------------------------------------------------------------

/// Wraps a provider with a shared semaphore capping concurrent calls, so a
/// local model is not overwhelmed by parallel runs.
pub struct ThrottledProvider {
    inner: Arc<dyn EmbeddingProvider>,
    permits: Arc<Semaphore>,
}

impl ThrottledProvider {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, permits: Arc<Semaphore>) -> Self {
        Self { inner, permits }
    }
}

#[async_trait]
impl EmbeddingProvider for ThrottledProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| EmbedError::ConfigError("embedding pool closed".to_string()))?;
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| EmbedError::ConfigError("embedding pool closed".to_string()))?;
        self.inner.embed_batch(texts).await
    }
}

/// Composes provider factories: the first one that recognizes a reference
/// wins. Lets the shell wire one factory per provider family.
pub struct FactorySet {
    factories: Vec<Arc<dyn EmbedderFactory>>,
}

impl FactorySet {
    pub fn new(factories: Vec<Arc<dyn EmbedderFactory>>) -> Self {
        Self { factories }
    }
}

impl EmbedderFactory for FactorySet {
    fn create(&self, provider: &str) -> Result<Arc<dyn EmbeddingProvider>, EmbedError> {
        for factory in &self.factories {
            match factory.create(provider) {
                Err(EmbedError::UnknownProvider(_)) => continue,
                outcome => return outcome,
            }
        }
        Err(EmbedError::UnknownProvider(provider.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(strategy: ChunkStrategy, max_tokens: u32, overlap: u32) -> ChunkingSpec {
        ChunkingSpec {
            strategy,
            max_tokens,
            overlap,
            fields: Vec::new(),
        }
    }

    #[test]
    fn test_provider_ref_parsing() {
        let p: ProviderRef = "ollama:mxbai-embed-large".parse().unwrap();
        assert_eq!(p.family, ProviderFamily::Ollama);
        assert_eq!(p.model, "mxbai-embed-large");
        assert_eq!(p.to_string(), "ollama:mxbai-embed-large");

        assert!("anthropic:claude".parse::<ProviderRef>().is_err());
        assert!("ollama".parse::<ProviderRef>().is_err());
        assert!("openai:".parse::<ProviderRef>().is_err());
    }

    #[test]
    fn test_chunk_respects_max_tokens() {
        let text = (0..250).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let chunks = chunk_text(&text, &spec(ChunkStrategy::Paragraph, 100, 0));
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(chunk.split_whitespace().count() <= 100);
        }
    }

    #[test]
    fn test_chunk_overlap_carries_tail() {
        let text = (0..120).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let chunks = chunk_text(&text, &spec(ChunkStrategy::Paragraph, 100, 10));
        assert_eq!(chunks.len(), 2);
        // Second chunk starts with the last 10 words of the first
        assert!(chunks[1].starts_with("w90"));
    }

    #[test]
    fn test_chunk_by_paragraph_packs_units() {
        let text = "one two three\n\nfour five\n\nsix";
        let chunks = chunk_text(text, &spec(ChunkStrategy::Paragraph, 100, 0));
        assert_eq!(chunks, vec!["one two three four five six"]);
    }

    #[test]
    fn test_chunk_by_headings() {
        let text = "# Intro\nalpha beta\n# Usage\ngamma delta";
        let units = split_units(text, ChunkStrategy::ByHeadings);
        assert_eq!(units.len(), 2);
        assert!(units[0].starts_with("# Intro"));
        assert!(units[1].starts_with("# Usage"));
    }

    #[test]
    fn test_sentence_split() {
        let units = split_sentences("One. Two! Three? Four");
        assert_eq!(units.len(), 4);
    }

    #[test]
    fn test_node_texts_by_fields() {
        let mut props = Map::new();
        props.insert("title".to_string(), json!("T"));
        props.insert("content".to_string(), json!("C"));
        props.insert("count".to_string(), json!(3));

        let mut by_fields = spec(ChunkStrategy::ByFields, 100, 0);
        by_fields.fields = vec!["content".to_string(), "missing".to_string()];
        assert_eq!(node_texts(&props, &by_fields), vec!["C"]);

        let texts = node_texts(&props, &spec(ChunkStrategy::Paragraph, 100, 0));
        assert_eq!(texts, vec!["C\n\nT"]);
    }

    #[test]
    fn test_fallback_vector_is_deterministic() {
        let a = fallback_vector("hello world", 1024);
        let b = fallback_vector("hello world", 1024);
        let c = fallback_vector("hello worlds", 1024);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 1024);

        let norm = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }
}
