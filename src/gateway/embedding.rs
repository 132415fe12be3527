//! Embedding gateway implementations.
//!
//! - **[`DisabledEmbedder`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIEmbedder`]**: `POST /v1/embeddings`.
//! - **[`OllamaEmbedder`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **[`VertexEmbedder`]**: Vertex AI text-embedding `:predict`.
//! - **[`HashEmbedder`]**: deterministic, offline feature hashing for demos and tests.
//!
//! HTTP clients are built once at construction with the configured timeout.
//! There is no retry loop: HTTP 429/5xx surface as transient
//! [`UpstreamStatus`](crate::error::UpstreamStatus) errors and the caller
//! decides.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{bearer_token, send_json, EmbeddingGateway};
use crate::config::EmbeddingConfig;

/// Dimensionality of [`HashEmbedder`] when none is configured.
pub const DEFAULT_HASH_DIMS: usize = 256;

fn build_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(config.timeout())
        .build()?)
}

// ============ Disabled ============

/// An embedder that always fails.
pub struct DisabledEmbedder;

#[async_trait]
impl EmbeddingGateway for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> Option<usize> {
        None
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ OpenAI ============

/// Embedding gateway using the OpenAI API.
///
/// Requires the `OPENAI_API_KEY` environment variable at construction.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: Option<usize>,
    url: String,
}

impl OpenAIEmbedder {
    /// # Errors
    ///
    /// Returns an error if `model` is not set in config or if
    /// `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        Ok(Self {
            client: build_client(config)?,
            api_key,
            model,
            dims: config.dims,
            url,
        })
    }
}

#[async_trait]
impl EmbeddingGateway for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        if let Some(dims) = self.dims {
            body["dimensions"] = serde_json::json!(dims);
        }

        let request = self
            .client
            .post(format!("{}/v1/embeddings", self.url))
            .bearer_auth(&self.api_key)
            .json(&body);
        let json = send_json("OpenAI", request).await?;
        first_vector(parse_openai_response(&json)?)
    }
}

/// Extract the `data[].embedding` arrays from an OpenAI embeddings response.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    data.iter()
        .map(|item| {
            let embedding = item
                .get("embedding")
                .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
            json_to_vector(embedding)
        })
        .collect()
}

// ============ Ollama ============

/// Embedding gateway using a local Ollama instance
/// (default `http://localhost:11434`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    dims: Option<usize>,
    url: String,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            client: build_client(config)?,
            model,
            dims: config.dims,
            url,
        })
    }
}

#[async_trait]
impl EmbeddingGateway for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let request = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body);
        let json = send_json("Ollama", request).await?;
        first_vector(parse_ollama_response(&json)?)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings.iter().map(json_to_vector).collect()
}

// ============ Vertex AI ============

/// Embedding gateway using a Vertex AI publisher text-embedding model.
///
/// The bearer token is read from `embedding.token_env` on every call, so
/// an external refresher can rotate it.
pub struct VertexEmbedder {
    client: reqwest::Client,
    model: String,
    dims: Option<usize>,
    endpoint: String,
    token_env: String,
}

impl VertexEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Vertex provider"))?;
        let project = config
            .project
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("embedding.project required for Vertex provider"))?;
        let location = config.location.as_deref().unwrap_or("us-central1");
        let endpoint = format!(
            "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models/{model}:predict"
        );

        Ok(Self {
            client: build_client(config)?,
            model,
            dims: config.dims,
            endpoint,
            token_env: config.token_env.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingGateway for VertexEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let token = bearer_token(&self.token_env)?;
        let mut body = serde_json::json!({
            "instances": [{ "content": text, "task_type": "RETRIEVAL_QUERY" }],
        });
        if let Some(dims) = self.dims {
            body["parameters"] = serde_json::json!({ "outputDimensionality": dims });
        }
        let request = self.client.post(&self.endpoint).bearer_auth(token).json(&body);
        let json = send_json("Vertex AI", request).await?;
        first_vector(parse_vertex_response(&json)?)
    }
}

fn parse_vertex_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let predictions = json
        .get("predictions")
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Vertex response: missing predictions array"))?;

    predictions
        .iter()
        .map(|p| {
            let values = p
                .pointer("/embeddings/values")
                .ok_or_else(|| anyhow::anyhow!("Invalid Vertex response: missing embeddings.values"))?;
            json_to_vector(values)
        })
        .collect()
}

// ============ Hash ============

/// Deterministic feature-hashing embedder.
///
/// Lowercased alphanumeric tokens are hashed into `dims` signed buckets and
/// the result is L2-normalized. Texts sharing words get nearby vectors, which
/// is enough to exercise the full pipeline without network access.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingGateway for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> Option<usize> {
        Some(self.dims)
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}

// ============ Helpers ============

fn json_to_vector(value: &serde_json::Value) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("embedding is not an array"))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow::anyhow!("embedding contains a non-numeric value"))
        })
        .collect()
}

fn first_vector(vectors: Vec<Vec<f32>>) -> Result<Vec<f32>> {
    vectors
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_openai() {
        let json = serde_json::json!({
            "data": [{ "index": 0, "embedding": [0.1, -0.2, 0.3] }]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![0.1f32, -0.2, 0.3]]);
    }

    #[test]
    fn test_parse_openai_missing_data() {
        let err = parse_openai_response(&serde_json::json!({ "error": "x" })).unwrap_err();
        assert!(err.to_string().contains("missing data array"));
    }

    #[test]
    fn test_parse_openai_non_numeric() {
        let json = serde_json::json!({ "data": [{ "embedding": [0.1, "oops"] }] });
        assert!(parse_openai_response(&json).is_err());
    }

    #[test]
    fn test_parse_ollama() {
        let json = serde_json::json!({ "embeddings": [[1.0, 2.0]] });
        assert_eq!(parse_ollama_response(&json).unwrap(), vec![vec![1.0f32, 2.0]]);
    }

    #[test]
    fn test_parse_vertex() {
        let json = serde_json::json!({
            "predictions": [{ "embeddings": { "values": [0.5, 0.25], "statistics": {} } }]
        });
        assert_eq!(parse_vertex_response(&json).unwrap(), vec![vec![0.5f32, 0.25]]);
    }

    #[test]
    fn test_first_vector_empty() {
        assert!(first_vector(Vec::new()).is_err());
    }

    #[tokio::test]
    async fn test_disabled_fails() {
        assert!(DisabledEmbedder.embed("hi").await.is_err());
    }

    #[test]
    fn test_hash_embedder_deterministic_and_normalized() {
        let e = HashEmbedder::new(64);
        let a = e.embed_sync("Rust async runtimes");
        let b = e.embed_sync("rust ASYNC runtimes!");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedder_no_tokens() {
        let e = HashEmbedder::new(8);
        assert_eq!(e.embed_sync("  ?! "), vec![0.0; 8]);
    }
}
