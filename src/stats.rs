//! Search latency statistics and SLO reporting.
//!
//! The [`LatencyRecorder`] keeps the most recent search latencies in a
//! bounded ring together with hit/miss/error counters. It backs
//! `GET /stats` and the `rag bench` command, which gives a quick answer to
//! "is the p95 under the latency objective?".

use anyhow::Result;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;

use crate::config::Config;
use crate::server::AppState;

/// Samples kept by [`LatencyRecorder::default`].
pub const DEFAULT_WINDOW: usize = 1024;

/// Bounded window of recent search latencies.
pub struct LatencyRecorder {
    window: usize,
    slo_p95_ms: f64,
    inner: Mutex<RecorderInner>,
}

#[derive(Default)]
struct RecorderInner {
    samples: VecDeque<f64>,
    cache_hits: u64,
    cache_misses: u64,
    errors: u64,
}

/// Point-in-time view of a [`LatencyRecorder`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySnapshot {
    /// Number of samples currently in the window.
    pub count: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub errors: u64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
    pub slo_p95_ms: f64,
    /// `true` when `p95_ms <= slo_p95_ms`. Vacuously true with no samples.
    pub slo_met: bool,
}

impl LatencyRecorder {
    pub fn new(window: usize, slo_p95_ms: f64) -> Self {
        Self {
            window: window.max(1),
            slo_p95_ms,
            inner: Mutex::new(RecorderInner::default()),
        }
    }

    pub fn record_hit(&self, latency_ms: f64) {
        let mut inner = self.inner.lock();
        inner.cache_hits += 1;
        push_sample(&mut inner.samples, self.window, latency_ms);
    }

    pub fn record_miss(&self, latency_ms: f64) {
        let mut inner = self.inner.lock();
        inner.cache_misses += 1;
        push_sample(&mut inner.samples, self.window, latency_ms);
    }

    /// Failed searches are counted but contribute no latency sample.
    pub fn record_error(&self) {
        self.inner.lock().errors += 1;
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let inner = self.inner.lock();
        let mut sorted: Vec<f64> = inner.samples.iter().copied().collect();
        let (cache_hits, cache_misses, errors) =
            (inner.cache_hits, inner.cache_misses, inner.errors);
        drop(inner);

        sorted.sort_by(f64::total_cmp);
        let p95_ms = percentile(&sorted, 95.0);
        LatencySnapshot {
            count: sorted.len(),
            cache_hits,
            cache_misses,
            errors,
            p50_ms: percentile(&sorted, 50.0),
            p95_ms,
            max_ms: sorted.last().copied().unwrap_or(0.0),
            slo_p95_ms: self.slo_p95_ms,
            slo_met: p95_ms <= self.slo_p95_ms,
        }
    }
}

impl Default for LatencyRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, 120.0)
    }
}

fn push_sample(samples: &mut VecDeque<f64>, window: usize, latency_ms: f64) {
    if samples.len() == window {
        samples.pop_front();
    }
    samples.push_back(latency_ms);
}

/// Nearest-rank percentile of an ascending slice; 0 when empty.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Run the bench command: issue the same search `iterations` times and
/// print a latency report against `search.slo_p95_ms`.
///
/// The first call is a cache miss and the rest are hits, unless `no_cache`
/// is set, in which case the cache is cleared before every call.
pub async fn run_bench(
    config: &Config,
    query: &str,
    iterations: usize,
    top_k: Option<usize>,
    no_cache: bool,
) -> Result<()> {
    let state = AppState::from_config(config).await?;
    let iterations = iterations.max(1);

    for _ in 0..iterations {
        if no_cache {
            state.cache.clear();
        }
        state.endpoint.search(query, top_k).await?;
    }

    let snap = state.recorder.snapshot();
    println!("RAG Harness: Search Bench");
    println!("=========================");
    println!();
    println!("  Query:       {}", query);
    println!("  Iterations:  {}", iterations);
    println!(
        "  Cache:       {} hits / {} misses",
        snap.cache_hits, snap.cache_misses
    );
    println!();
    println!("  p50:         {:.2} ms", snap.p50_ms);
    println!("  p95:         {:.2} ms", snap.p95_ms);
    println!("  max:         {:.2} ms", snap.max_ms);
    println!(
        "  SLO:         p95 <= {:.0} ms ({})",
        snap.slo_p95_ms,
        if snap.slo_met { "met" } else { "MISSED" }
    );
    println!();
    Ok(())
}
