//! HTTP server.
//!
//! Exposes cached search and streamed summarization as a JSON/SSE API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/search?q=<text>&top_k=<int>` | Ranked matches, latency, cache status |
//! | `POST` | `/summarize` | Server-sent event stream of summary fragments |
//! | `POST` | `/cache/clear` | Drop every cached result |
//! | `GET`  | `/stats` | Latency percentiles and SLO status |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Error responses carry the error kind, a machine-readable code, and a
//! retry hint:
//!
//! ```json
//! { "error": { "type": "ValidationError", "code": "validation_error",
//!              "message": "query must not be empty", "retryable": false } }
//! ```
//!
//! Validation failures are `422`. Embedding and index failures are `502`,
//! or `504` when the failure is transient and the request may be retried.
//!
//! # Streaming
//!
//! `POST /summarize` responds with `text/event-stream`. Each frame is
//! `data: <json>\n\n` carrying either `{"text": ...}` or the trailing
//! `{"done": true, ...}` metadata. A generation failure ends the stream with
//! a single `{"error": {...}}` frame and no `done` frame.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cache::ResultCache;
use crate::config::Config;
use crate::endpoint::SearchEndpoint;
use crate::error::ServeError;
use crate::gateway::{
    create_embedding_gateway, create_generation_gateway, create_index_gateway, EmbeddingGateway,
    GenerationGateway, IndexGateway,
};
use crate::models::SearchResponse;
use crate::query::VectorQueryClient;
use crate::stats::{LatencyRecorder, LatencySnapshot, DEFAULT_WINDOW};
use crate::summarize::Summarizer;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
///
/// Every collaborator is constructed once and injected; nothing is
/// initialized lazily on first request.
#[derive(Clone)]
pub struct AppState {
    pub endpoint: Arc<SearchEndpoint>,
    pub summarizer: Arc<Summarizer>,
    pub cache: Arc<ResultCache>,
    pub recorder: Arc<LatencyRecorder>,
}

impl AppState {
    /// Build the gateways selected by `config` and wire them up.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_embedding_gateway(&config.embedding)?;
        let index = create_index_gateway(&config.index, embedder.as_ref()).await?;
        let generator = create_generation_gateway(&config.generation)?;
        Ok(Self::with_gateways(config, embedder, index, generator))
    }

    /// Wire explicitly provided gateways using the tuning values in `config`.
    pub fn with_gateways(
        config: &Config,
        embedder: Arc<dyn EmbeddingGateway>,
        index: Arc<dyn IndexGateway>,
        generator: Arc<dyn GenerationGateway>,
    ) -> Self {
        let cache = Arc::new(ResultCache::new(config.cache.ttl(), config.cache.max_entries));
        let recorder = Arc::new(LatencyRecorder::new(
            DEFAULT_WINDOW,
            config.search.slo_p95_ms,
        ));
        let client = Arc::new(VectorQueryClient::new(
            embedder,
            index,
            config.embedding.timeout(),
            config.index.timeout(),
        ));
        let endpoint = Arc::new(SearchEndpoint::new(
            client,
            Arc::clone(&cache),
            Arc::clone(&recorder),
            config.search.default_top_k,
            config.search.max_top_k,
        ));
        let summarizer = Arc::new(Summarizer::new(
            generator,
            config.generation.max_tokens,
            config.generation.timeout(),
            config.generation.channel_capacity,
        ));

        Self {
            endpoint,
            summarizer,
            cache,
            recorder,
        }
    }
}

/// Build the router with all routes, CORS, and request tracing.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search", get(handle_search))
        .route("/summarize", post(handle_summarize))
        .route("/cache/clear", post(handle_cache_clear))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Starts the HTTP server.
///
/// Binds to the address configured in `[server].bind` and serves until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config).await?;
    serve(config, state).await
}

/// Serve an already-built [`AppState`] on `[server].bind`.
pub async fn serve(config: &Config, state: AppState) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    tracing::info!(
        embedding = %config.embedding.provider,
        index = %config.index.provider,
        generation = %config.generation.provider,
        model = %state.summarizer.model_name(),
        cache_ttl_secs = config.cache.ttl_secs,
        cache_max_entries = config.cache.max_entries,
        "starting server"
    );

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

/// Error kind, machine-readable code, message, and retry hint.
#[derive(Serialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: &'static str,
    code: &'static str,
    message: String,
    retryable: bool,
}

impl From<&ServeError> for ErrorBody {
    fn from(err: &ServeError) -> Self {
        ErrorBody {
            error: ErrorDetail {
                kind: err.kind(),
                code: err.code(),
                message: err.to_string(),
                retryable: err.is_retryable(),
            },
        }
    }
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError(ServeError);

impl From<ServeError> for AppError {
    fn from(err: ServeError) -> Self {
        AppError(err)
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            ServeError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            e if e.is_retryable() => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    /// The crate version from `Cargo.toml`.
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ GET /search ============

/// Raw query parameters. Both are parsed by hand so that every malformed
/// value is reported as a `ValidationError` rather than an extractor
/// rejection.
#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
    top_k: Option<String>,
}

async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let query = params
        .q
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ServeError::validation("q is required and must not be empty"))?;
    let top_k = parse_top_k(params.top_k.as_deref())?;

    let response = state.endpoint.search(&query, top_k).await?;
    Ok(Json(response))
}

fn parse_top_k(raw: Option<&str>) -> Result<Option<usize>, ServeError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse::<usize>().map(Some).map_err(|_| {
            ServeError::validation(format!("top_k must be a positive integer, got '{}'", s))
        }),
    }
}

// ============ POST /summarize ============

#[derive(Deserialize)]
struct SummarizeRequest {
    content: Option<String>,
    max_tokens: Option<i64>,
    /// Cache status of the search that produced `content`.
    #[serde(default)]
    cache_hit: bool,
}

async fn handle_summarize(
    State(state): State<AppState>,
    body: Result<Json<SummarizeRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let Json(req) = body.map_err(|e| {
        ServeError::validation(format!("invalid request body: {}", e.body_text()))
    })?;
    let content = req
        .content
        .ok_or_else(|| ServeError::validation("content is required"))?;
    let max_tokens = match req.max_tokens {
        Some(n) if n <= 0 => {
            return Err(ServeError::validation("max_tokens must be a positive integer").into())
        }
        Some(n) => Some(n as usize),
        None => None,
    };

    let summary = state
        .summarizer
        .summarize(&content, max_tokens, req.cache_hit)?;
    tracing::debug!(request_id = %summary.request_id(), "summary stream opened");

    let frames = summary.into_stream().map(|item| {
        let payload = match item {
            Ok(event) => event.frame_json(),
            Err(err) => serde_json::json!(ErrorBody::from(&err)),
        };
        Ok(Event::default().data(payload.to_string()))
    });

    Ok(Sse::new(frames).keep_alive(KeepAlive::default()))
}

// ============ POST /cache/clear ============

#[derive(Serialize)]
struct ClearResponse {
    cleared: usize,
}

async fn handle_cache_clear(State(state): State<AppState>) -> Json<ClearResponse> {
    let cleared = state.cache.clear();
    tracing::info!(cleared, "result cache cleared");
    Json(ClearResponse { cleared })
}

// ============ GET /stats ============

async fn handle_stats(State(state): State<AppState>) -> Json<LatencySnapshot> {
    Json(state.recorder.snapshot())
}
