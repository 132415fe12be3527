//! Core data models used throughout the harness.
//!
//! These types represent the matches, responses, and stream events that flow
//! from the gateways through the search and summarization layers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One retrieved candidate.
///
/// Within a single query's result list, matches are sorted by `score`
/// descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    /// Identifier of the source text segment (non-empty).
    pub chunk_id: String,
    /// Similarity in `[0.0, 1.0]`, higher is more relevant.
    pub score: f64,
    /// Text payload. Empty unless hydrated by a separate lookup.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl SearchMatch {
    pub fn new(chunk_id: impl Into<String>, score: f64) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            score,
            content: String::new(),
            metadata: BTreeMap::new(),
        }
    }
}

/// A nearest-neighbor hit as reported by the ANN index gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: String,
    /// Backend distance; smaller is closer.
    pub distance: f64,
}

/// Response of the search endpoint, matching the `GET /search` body.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    /// Shared, immutable view of the match list. Cache hits hand out the
    /// same allocation the cache holds.
    #[serde(rename = "results")]
    pub matches: Arc<[SearchMatch]>,
    /// Wall-clock time of this call, including cache lookup overhead.
    pub latency_ms: f64,
    pub cache_hit: bool,
}

/// Event emitted by the summarization streamer.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// One fragment of the generated answer, in generation order.
    Content { text: String },
    /// Exactly one per completed request, always last.
    Final {
        cache_hit: bool,
        total_time_ms: f64,
        time_to_last_token_ms: f64,
    },
}

impl StreamEvent {
    /// JSON payload carried by this event's `data:` frame.
    pub fn frame_json(&self) -> serde_json::Value {
        match self {
            StreamEvent::Content { text } => serde_json::json!({ "text": text }),
            StreamEvent::Final {
                cache_hit,
                total_time_ms,
                time_to_last_token_ms,
            } => serde_json::json!({
                "done": true,
                "cache_hit": cache_hit,
                "time_to_last_token_ms": time_to_last_token_ms,
                "total_time_ms": total_time_ms,
            }),
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, StreamEvent::Final { .. })
    }
}
