//! Cached search orchestration.
//!
//! [`SearchEndpoint::search`] validates a request, consults the
//! [`ResultCache`] under the request's [`QueryFingerprint`], and falls back
//! to the [`VectorQueryClient`] on a miss. Successful misses populate the
//! cache; failures never touch it, so a previously cached value for the
//! same fingerprint survives a downstream outage untouched.
//!
//! `latency_ms` in the response is this call's wall-clock time, cache
//! lookup included. It is independent of the query client's own
//! last-latency counter, which is stale on a hit.

use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;

use crate::cache::ResultCache;
use crate::config::Config;
use crate::error::ServeError;
use crate::fingerprint::QueryFingerprint;
use crate::models::SearchResponse;
use crate::query::VectorQueryClient;
use crate::server::AppState;
use crate::stats::LatencyRecorder;

/// The cached search operation. All collaborators are injected.
pub struct SearchEndpoint {
    client: Arc<VectorQueryClient>,
    cache: Arc<ResultCache>,
    recorder: Arc<LatencyRecorder>,
    default_top_k: usize,
    max_top_k: usize,
}

impl SearchEndpoint {
    pub fn new(
        client: Arc<VectorQueryClient>,
        cache: Arc<ResultCache>,
        recorder: Arc<LatencyRecorder>,
        default_top_k: usize,
        max_top_k: usize,
    ) -> Self {
        Self {
            client,
            cache,
            recorder,
            default_top_k,
            max_top_k,
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Search for `query`, returning up to `top_k` matches (default
    /// `search.default_top_k`).
    pub async fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<SearchResponse, ServeError> {
        let started = Instant::now();
        let top_k = top_k.unwrap_or(self.default_top_k);
        self.validate(query, top_k)?;

        let fingerprint = QueryFingerprint::new(query, top_k);
        if let Some(matches) = self.cache.lookup(&fingerprint) {
            let latency_ms = elapsed_ms(started);
            self.recorder.record_hit(latency_ms);
            tracing::debug!(%fingerprint, latency_ms, "cache hit");
            return Ok(SearchResponse {
                matches,
                latency_ms,
                cache_hit: true,
            });
        }

        let matches = match self.client.query(query, top_k).await {
            Ok(matches) => matches,
            Err(e) => {
                self.recorder.record_error();
                tracing::warn!(%fingerprint, error = %e, kind = e.kind(), "search failed");
                return Err(e);
            }
        };

        let matches: Arc<[_]> = matches.into();
        self.cache.store(fingerprint, Arc::clone(&matches));
        let latency_ms = elapsed_ms(started);
        self.recorder.record_miss(latency_ms);
        tracing::debug!(%fingerprint, latency_ms, returned = matches.len(), "cache miss");

        Ok(SearchResponse {
            matches,
            latency_ms,
            cache_hit: false,
        })
    }

    fn validate(&self, query: &str, top_k: usize) -> Result<(), ServeError> {
        if query.trim().is_empty() {
            return Err(ServeError::validation("query must not be empty"));
        }
        if top_k == 0 {
            return Err(ServeError::validation("top_k must be a positive integer"));
        }
        if top_k > self.max_top_k {
            return Err(ServeError::validation(format!(
                "top_k must be <= {}",
                self.max_top_k
            )));
        }
        Ok(())
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Run the search command: one search, printed as a ranked list.
pub async fn run_search(config: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    let state = AppState::from_config(config).await?;
    let response = state.endpoint.search(query, top_k).await?;

    if response.matches.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, m) in response.matches.iter().enumerate() {
        println!("{}. [{:.4}] {}", i + 1, m.score, m.chunk_id);
        if !m.content.is_empty() {
            println!("    {}", m.content);
        }
    }
    println!();
    println!(
        "{} result(s) in {:.2} ms (cache {})",
        response.matches.len(),
        response.latency_ms,
        if response.cache_hit { "hit" } else { "miss" }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{EmbeddingGateway, IndexGateway};
    use crate::models::Neighbor;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct UnitEmbedder;

    #[async_trait]
    impl EmbeddingGateway for UnitEmbedder {
        fn model_name(&self) -> &str {
            "unit"
        }
        fn dims(&self) -> Option<usize> {
            None
        }
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![1.0])
        }
    }

    #[derive(Default)]
    struct CountingIndex {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl IndexGateway for CountingIndex {
        fn name(&self) -> &str {
            "counting"
        }
        async fn find_neighbors(&self, _vector: &[f32], k: usize) -> anyhow::Result<Vec<Neighbor>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("index down");
            }
            Ok((0..k)
                .map(|i| Neighbor {
                    id: format!("chunk-{}", i),
                    distance: i as f64,
                })
                .collect())
        }
    }

    fn endpoint(index: Arc<CountingIndex>) -> SearchEndpoint {
        let client = VectorQueryClient::new(
            Arc::new(UnitEmbedder),
            index,
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        SearchEndpoint::new(
            Arc::new(client),
            Arc::new(ResultCache::default()),
            Arc::new(LatencyRecorder::default()),
            10,
            100,
        )
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let index = Arc::new(CountingIndex::default());
        let ep = endpoint(Arc::clone(&index));

        let first = ep.search("What is AI?", Some(3)).await.unwrap();
        assert!(!first.cache_hit);
        assert_eq!(first.matches.len(), 3);

        let second = ep.search("What is AI?", Some(3)).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.matches, first.matches);
        assert!(Arc::ptr_eq(&second.matches, &first.matches));
        assert_eq!(index.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_normalized_queries_share_entry() {
        let index = Arc::new(CountingIndex::default());
        let ep = endpoint(Arc::clone(&index));
        ep.search("What is AI?", Some(3)).await.unwrap();
        let resp = ep.search("  what   IS ai?", Some(3)).await.unwrap();
        assert!(resp.cache_hit);

        // a different top_k is a different key
        let resp = ep.search("What is AI?", Some(4)).await.unwrap();
        assert!(!resp.cache_hit);
    }

    #[tokio::test]
    async fn test_default_top_k() {
        let ep = endpoint(Arc::new(CountingIndex::default()));
        let resp = ep.search("x", None).await.unwrap();
        assert_eq!(resp.matches.len(), 10);
    }

    #[tokio::test]
    async fn test_validation() {
        let index = Arc::new(CountingIndex::default());
        let ep = endpoint(Arc::clone(&index));
        for (q, k) in [("", Some(3)), ("  ", None), ("x", Some(0)), ("x", Some(101))] {
            let err = ep.search(q, k).await.unwrap_err();
            assert_eq!(err.kind(), "ValidationError", "query {:?} top_k {:?}", q, k);
        }
        assert_eq!(index.calls.load(Ordering::SeqCst), 0);
        assert!(ep.cache().is_empty());
    }

    #[tokio::test]
    async fn test_failure_does_not_touch_cache() {
        let index = Arc::new(CountingIndex::default());
        let ep = endpoint(Arc::clone(&index));

        index.fail.store(true, Ordering::SeqCst);
        let err = ep.search("fresh", Some(2)).await.unwrap_err();
        assert_eq!(err.kind(), "IndexQueryError");
        assert!(ep.cache().is_empty());

        index.fail.store(false, Ordering::SeqCst);
        let cached = ep.search("cached", Some(2)).await.unwrap();
        assert_eq!(ep.cache().len(), 1);

        // an outage never evicts or overwrites an existing entry
        index.fail.store(true, Ordering::SeqCst);
        assert!(ep.search("other", Some(2)).await.is_err());
        let hit = ep.search("cached", Some(2)).await.unwrap();
        assert!(hit.cache_hit);
        assert_eq!(hit.matches, cached.matches);
        assert_eq!(ep.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_records_latency() {
        let index = Arc::new(CountingIndex::default());
        let recorder = Arc::new(LatencyRecorder::default());
        let client = VectorQueryClient::new(
            Arc::new(UnitEmbedder),
            Arc::clone(&index) as Arc<dyn IndexGateway>,
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let ep = SearchEndpoint::new(
            Arc::new(client),
            Arc::new(ResultCache::default()),
            Arc::clone(&recorder),
            10,
            100,
        );

        ep.search("x", Some(1)).await.unwrap();
        ep.search("x", Some(1)).await.unwrap();
        index.fail.store(true, Ordering::SeqCst);
        let _ = ep.search("y", Some(1)).await;

        let snap = recorder.snapshot();
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.count, 2);
    }
}
