//! # RAG Harness
//!
//! A query-serving harness for a cloud-hosted vector search and
//! summarization pipeline.
//!
//! The harness turns a user query into a ranked list of matches (with a
//! result cache in front of the expensive vector search) and turns retrieved
//! context into a token-streamed answer with trailing timing metadata.
//!
//! ## Architecture
//!
//! ```text
//!   GET /search                         POST /summarize
//!        │                                     │
//!        ▼                                     ▼
//! ┌──────────────┐    hit    ┌─────────┐  ┌────────────┐
//! │SearchEndpoint│──────────▶│  Cache  │  │ Summarizer │
//! └──────┬───────┘           └─────────┘  └─────┬──────┘
//!        │ miss                                 │ fragments
//!        ▼                                      ▼
//! ┌──────────────────┐                 ┌────────────────┐
//! │VectorQueryClient │                 │ Generation GW  │
//! │ embed → ANN →    │                 └────────────────┘
//! │ similarity score │
//! └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Request error taxonomy |
//! | [`models`] | Matches, responses, and stream events |
//! | [`scoring`] | Distance → similarity conversion |
//! | [`fingerprint`] | Normalized cache keys |
//! | [`cache`] | TTL + capacity bounded result cache |
//! | [`gateway`] | Embedding, ANN index, and generation backends |
//! | [`query`] | Vector query client |
//! | [`endpoint`] | Cached search orchestration |
//! | [`summarize`] | Streamed summarization |
//! | [`stats`] | Latency percentiles and SLO reporting |
//! | [`server`] | HTTP server |

pub mod cache;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod fingerprint;
pub mod gateway;
pub mod models;
pub mod query;
pub mod scoring;
pub mod server;
pub mod stats;
pub mod summarize;
