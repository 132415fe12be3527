//! External collaborator boundaries.
//!
//! The serving layer talks to three black boxes, each behind a trait so that
//! backends are chosen by configuration and passed in explicitly at
//! construction time:
//!
//! | Trait | Purpose | Implementations |
//! |-------|---------|-----------------|
//! | [`EmbeddingGateway`] | query text → vector | disabled, openai, ollama, vertex, hash |
//! | [`IndexGateway`] | vector → k nearest `(id, distance)` | memory, vertex |
//! | [`GenerationGateway`] | prompt → stream of text fragments | disabled, openai, ollama, echo |
//!
//! Gateways never retry. Failures are returned as [`anyhow::Error`]; HTTP
//! status failures carry an [`UpstreamStatus`](crate::error::UpstreamStatus)
//! so callers can tell transient errors from permanent ones.

pub mod embedding;
pub mod generation;
pub mod index;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

use crate::config::{EmbeddingConfig, GenerationConfig, IndexConfig};
use crate::models::Neighbor;

pub use embedding::{
    DisabledEmbedder, HashEmbedder, OllamaEmbedder, OpenAIEmbedder, VertexEmbedder,
};
pub use generation::{DisabledGenerator, EchoGenerator, OllamaGenerator, OpenAIGenerator};
pub use index::{MemoryIndex, VertexIndex};

/// Converts query text into a fixed-length vector.
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Expected dimensionality, if known. Vectors of any other length are
    /// rejected as malformed.
    fn dims(&self) -> Option<usize>;
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Approximate nearest-neighbor lookup.
#[async_trait]
pub trait IndexGateway: Send + Sync {
    fn name(&self) -> &str;
    /// Return up to `k` neighbors of `vector`, in the backend's own ranking.
    async fn find_neighbors(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>>;
}

/// Ordered sequence of generated text fragments.
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// Input to a generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Instruction given to the model.
    pub system: String,
    /// Context the model works on.
    pub content: String,
    pub max_tokens: usize,
}

/// Streaming text generation.
///
/// Dropping the returned stream must stop the underlying request; no
/// fragments are produced in the background afterwards.
#[async_trait]
pub trait GenerationGateway: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, request: GenerationRequest) -> Result<FragmentStream>;
}

/// Create the embedding gateway selected by `config.provider`.
///
/// | Config Value | Gateway |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"vertex"` | [`VertexEmbedder`] |
/// | `"hash"` | [`HashEmbedder`] |
pub fn create_embedding_gateway(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingGateway>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "vertex" => Ok(Arc::new(VertexEmbedder::new(config)?)),
        "hash" => Ok(Arc::new(HashEmbedder::new(
            config.dims.unwrap_or(embedding::DEFAULT_HASH_DIMS),
        ))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Create the ANN index gateway selected by `config.provider`.
///
/// The `memory` provider loads its corpus from `config.path` (if set),
/// embedding text records with `embedder`.
pub async fn create_index_gateway(
    config: &IndexConfig,
    embedder: &dyn EmbeddingGateway,
) -> Result<Arc<dyn IndexGateway>> {
    match config.provider.as_str() {
        "memory" => match &config.path {
            Some(path) => Ok(Arc::new(MemoryIndex::load_jsonl(path, embedder).await?)),
            None => Ok(Arc::new(MemoryIndex::default())),
        },
        "vertex" => Ok(Arc::new(VertexIndex::new(config)?)),
        other => bail!("Unknown index provider: {}", other),
    }
}

/// Create the generation gateway selected by `config.provider`.
pub fn create_generation_gateway(config: &GenerationConfig) -> Result<Arc<dyn GenerationGateway>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        "echo" => Ok(Arc::new(EchoGenerator::default())),
        other => bail!("Unknown generation provider: {}", other),
    }
}

/// Send a JSON request and decode a JSON response body.
///
/// Non-success statuses become an [`UpstreamStatus`](crate::error::UpstreamStatus)
/// error carrying the response body.
pub(crate) async fn send_json(
    service: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<serde_json::Value> {
    let response = request
        .send()
        .await
        .with_context(|| format!("{} request failed", service))?;
    let response = check_status(service, response).await?;
    let json = response
        .json()
        .await
        .with_context(|| format!("{} returned invalid JSON", service))?;
    Ok(json)
}

/// Pass through a successful response, or turn it into an
/// [`UpstreamStatus`](crate::error::UpstreamStatus) error.
pub(crate) async fn check_status(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(crate::error::UpstreamStatus {
        service,
        status: status.as_u16(),
        body,
    }
    .into())
}

/// Read a bearer token from the named environment variable.
pub(crate) fn bearer_token(var: &str) -> Result<String> {
    std::env::var(var).map_err(|_| anyhow::anyhow!("{} environment variable not set", var))
}
