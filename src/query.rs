//! Vector query client: embedding → ANN lookup → similarity scoring.
//!
//! # Latency bookkeeping
//!
//! [`VectorQueryClient::last_latency_ms`] holds the wall-clock latency of the
//! most recent successful [`query`](VectorQueryClient::query) on this
//! instance. When one client is shared across concurrent requests the value
//! is last-writer-wins: a diagnostic for SLO harnesses, not a per-request
//! measurement. Use [`query_timed`](VectorQueryClient::query_timed) to get
//! the latency of a specific call.
//!
//! # Timeouts
//!
//! Both gateway calls are bounded. A timeout is reported as a retryable
//! [`ServeError::Embedding`] / [`ServeError::IndexQuery`]; the client never
//! retries by itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::ServeError;
use crate::gateway::{EmbeddingGateway, IndexGateway};
use crate::models::{Neighbor, SearchMatch};
use crate::scoring::similarity;

/// Matches plus the latency of the call that produced them.
#[derive(Debug, Clone)]
pub struct TimedMatches {
    pub matches: Vec<SearchMatch>,
    pub latency_ms: f64,
}

/// Orchestrates the embedding and ANN index gateways.
pub struct VectorQueryClient {
    embedder: Arc<dyn EmbeddingGateway>,
    index: Arc<dyn IndexGateway>,
    embed_timeout: Duration,
    index_timeout: Duration,
    /// `f64` bits; NaN until the first successful query.
    last_latency: AtomicU64,
}

impl VectorQueryClient {
    pub fn new(
        embedder: Arc<dyn EmbeddingGateway>,
        index: Arc<dyn IndexGateway>,
        embed_timeout: Duration,
        index_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            index,
            embed_timeout,
            index_timeout,
            last_latency: AtomicU64::new(f64::NAN.to_bits()),
        }
    }

    /// Return the `top_k` nearest matches for `text`, sorted by score
    /// descending.
    pub async fn query(&self, text: &str, top_k: usize) -> Result<Vec<SearchMatch>, ServeError> {
        Ok(self.query_timed(text, top_k).await?.matches)
    }

    /// Like [`query`](Self::query), also returning this call's latency.
    pub async fn query_timed(&self, text: &str, top_k: usize) -> Result<TimedMatches, ServeError> {
        if text.trim().is_empty() {
            return Err(ServeError::validation("query must not be empty"));
        }
        if top_k == 0 {
            return Err(ServeError::validation("top_k must be a positive integer"));
        }

        let started = Instant::now();
        let vector = self.embed(text).await?;
        let neighbors = self.find_neighbors(&vector, top_k).await?;
        let mut matches = rank_neighbors(neighbors)?;
        matches.truncate(top_k);

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.last_latency
            .store(latency_ms.to_bits(), Ordering::Relaxed);
        tracing::debug!(
            top_k,
            returned = matches.len(),
            latency_ms,
            "vector query complete"
        );

        Ok(TimedMatches {
            matches,
            latency_ms,
        })
    }

    /// Latency of the most recent successful query, if any.
    pub fn last_latency_ms(&self) -> Option<f64> {
        let value = f64::from_bits(self.last_latency.load(Ordering::Relaxed));
        (!value.is_nan()).then_some(value)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServeError> {
        let vector = match tokio::time::timeout(self.embed_timeout, self.embedder.embed(text)).await
        {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => return Err(ServeError::embedding(&e)),
            Err(_) => {
                return Err(ServeError::Embedding {
                    message: format!(
                        "embedding timed out after {}ms",
                        self.embed_timeout.as_millis()
                    ),
                    retryable: true,
                })
            }
        };
        validate_vector(&vector, self.embedder.dims())?;
        Ok(vector)
    }

    async fn find_neighbors(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>, ServeError> {
        match tokio::time::timeout(self.index_timeout, self.index.find_neighbors(vector, k)).await {
            Ok(Ok(neighbors)) => Ok(neighbors),
            Ok(Err(e)) => Err(ServeError::index_query(&e)),
            Err(_) => Err(ServeError::IndexQuery {
                message: format!(
                    "index query timed out after {}ms",
                    self.index_timeout.as_millis()
                ),
                retryable: true,
            }),
        }
    }
}

/// Reject empty vectors, non-finite components, and dimension mismatches.
fn validate_vector(vector: &[f32], expected_dims: Option<usize>) -> Result<(), ServeError> {
    let malformed = |message: String| ServeError::Embedding {
        message,
        retryable: false,
    };
    if vector.is_empty() {
        return Err(malformed("embedding gateway returned an empty vector".to_string()));
    }
    if let Some(dims) = expected_dims {
        if vector.len() != dims {
            return Err(malformed(format!(
                "embedding has {} dims, expected {}",
                vector.len(),
                dims
            )));
        }
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Err(malformed("embedding contains non-finite values".to_string()));
    }
    Ok(())
}

/// Score neighbors and sort by score descending. The sort is stable, so
/// ties keep the gateway's own ranking.
fn rank_neighbors(neighbors: Vec<Neighbor>) -> Result<Vec<SearchMatch>, ServeError> {
    let mut matches = Vec::with_capacity(neighbors.len());
    for n in neighbors {
        if n.id.is_empty() {
            return Err(ServeError::IndexQuery {
                message: "index returned a neighbor with an empty id".to_string(),
                retryable: false,
            });
        }
        matches.push(SearchMatch::new(n.id, similarity(n.distance)));
    }
    matches.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(matches)
}
