//! ANN index gateway implementations.
//!
//! - **[`MemoryIndex`]**: brute-force cosine search over an in-process
//!   corpus; exact rather than approximate, suitable for demos and tests.
//! - **[`VertexIndex`]**: Vertex AI Vector Search `findNeighbors`, addressed
//!   by (project, location, index endpoint id, deployed index id).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;

use super::{bearer_token, send_json, EmbeddingGateway, IndexGateway};
use crate::config::IndexConfig;
use crate::models::Neighbor;

// ============ Memory ============

/// One indexed vector.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub id: String,
    pub vector: Vec<f32>,
}

/// A JSONL corpus line: either a precomputed vector or text to embed.
#[derive(Debug, Deserialize)]
struct CorpusLine {
    id: String,
    #[serde(default)]
    vector: Option<Vec<f32>>,
    #[serde(default)]
    text: Option<String>,
}

/// In-process index with cosine distance (`1 - cosine`, floored at 0).
///
/// Ties keep insertion order.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    records: Vec<IndexRecord>,
}

impl MemoryIndex {
    pub fn new(records: Vec<IndexRecord>) -> Self {
        Self { records }
    }

    /// Load a JSONL corpus. Each line is `{"id": ..., "vector": [...]}` or
    /// `{"id": ..., "text": "..."}`; text lines are embedded with `embedder`.
    pub async fn load_jsonl(path: &Path, embedder: &dyn EmbeddingGateway) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read index corpus: {}", path.display()))?;

        let mut records = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let parsed: CorpusLine = serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid corpus line", path.display(), lineno + 1))?;
            if parsed.id.is_empty() {
                bail!("{}:{}: empty id", path.display(), lineno + 1);
            }
            let vector = match (parsed.vector, parsed.text) {
                (Some(v), _) => v,
                (None, Some(text)) => embedder
                    .embed(&text)
                    .await
                    .with_context(|| format!("embedding corpus record '{}'", parsed.id))?,
                (None, None) => bail!(
                    "{}:{}: record needs either 'vector' or 'text'",
                    path.display(),
                    lineno + 1
                ),
            };
            records.push(IndexRecord {
                id: parsed.id,
                vector,
            });
        }

        tracing::info!(records = records.len(), path = %path.display(), "loaded memory index");
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl IndexGateway for MemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn find_neighbors(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if let Some(r) = self.records.iter().find(|r| r.vector.len() != vector.len()) {
            bail!(
                "dimension mismatch: query has {} dims, record '{}' has {}",
                vector.len(),
                r.id,
                r.vector.len()
            );
        }

        let mut neighbors: Vec<Neighbor> = self
            .records
            .iter()
            .map(|r| Neighbor {
                id: r.id.clone(),
                distance: (1.0 - cosine_similarity(vector, &r.vector) as f64).max(0.0),
            })
            .collect();
        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        neighbors.truncate(k);
        Ok(neighbors)
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, and zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

// ============ Vertex AI Vector Search ============

/// Vertex AI Vector Search index endpoint.
pub struct VertexIndex {
    client: reqwest::Client,
    url: String,
    deployed_index_id: String,
    token_env: String,
}

impl VertexIndex {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let required = |value: &Option<String>, name: &str| {
            value
                .clone()
                .ok_or_else(|| anyhow::anyhow!("index.{} required for Vertex provider", name))
        };
        let project = required(&config.project, "project")?;
        let location = required(&config.location, "location")?;
        let endpoint_id = required(&config.endpoint_id, "endpoint_id")?;
        let deployed_index_id = required(&config.deployed_index_id, "deployed_index_id")?;

        let host = config
            .public_domain
            .clone()
            .unwrap_or_else(|| format!("{location}-aiplatform.googleapis.com"));
        let url = format!(
            "https://{host}/v1/projects/{project}/locations/{location}/indexEndpoints/{endpoint_id}:findNeighbors"
        );

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(config.timeout())
                .build()?,
            url,
            deployed_index_id,
            token_env: config.token_env.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl IndexGateway for VertexIndex {
    fn name(&self) -> &str {
        "vertex"
    }

    async fn find_neighbors(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        let token = bearer_token(&self.token_env)?;
        let body = find_neighbors_body(&self.deployed_index_id, vector, k);
        let request = self.client.post(&self.url).bearer_auth(token).json(&body);
        let json = send_json("Vertex Vector Search", request)
            .await
            .context("findNeighbors")?;
        parse_find_neighbors_response(&json)
    }
}

fn find_neighbors_body(deployed_index_id: &str, vector: &[f32], k: usize) -> serde_json::Value {
    serde_json::json!({
        "deployedIndexId": deployed_index_id,
        "queries": [{
            "datapoint": { "datapointId": "query", "featureVector": vector },
            "neighborCount": k,
        }],
        "returnFullDatapoint": false,
    })
}

/// Extract `(datapointId, distance)` pairs from a `findNeighbors` response.
///
/// A response without `nearestNeighbors` (or with an empty neighbor list)
/// is an empty result, not an error.
fn parse_find_neighbors_response(json: &serde_json::Value) -> Result<Vec<Neighbor>> {
    let Some(first) = json
        .get("nearestNeighbors")
        .and_then(|n| n.as_array())
        .and_then(|n| n.first())
    else {
        return Ok(Vec::new());
    };
    let Some(neighbors) = first.get("neighbors").and_then(|n| n.as_array()) else {
        return Ok(Vec::new());
    };

    neighbors
        .iter()
        .map(|n| {
            let id = n
                .pointer("/datapoint/datapointId")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow::anyhow!("Invalid findNeighbors response: missing datapointId"))?;
            // proto3 JSON omits zero-valued fields
            let distance = n.get("distance").and_then(|d| d.as_f64()).unwrap_or(0.0);
            Ok(Neighbor {
                id: id.to_string(),
                distance,
            })
        })
        .collect()
}
