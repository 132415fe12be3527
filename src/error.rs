//! Error taxonomy for the query-serving layer.
//!
//! Every request-scoped failure is one of four kinds. Validation errors are
//! raised before any gateway is called; embedding and index errors abort a
//! search without touching the cache; generation errors terminate a summary
//! stream with an explicit error frame.
//!
//! Gateways report failures as [`anyhow::Error`]. The query client and the
//! summarizer classify them into a [`ServeError`] at the seam, using
//! [`is_transient`] to decide whether the caller may retry.

use thiserror::Error;

/// A request-scoped failure surfaced to callers of the core.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServeError {
    /// The query could not be embedded (gateway failure, timeout, or a
    /// malformed vector).
    #[error("embedding failed: {message}")]
    Embedding { message: String, retryable: bool },

    /// The ANN lookup failed or timed out.
    #[error("index query failed: {message}")]
    IndexQuery { message: String, retryable: bool },

    /// Streaming generation failed before the summary completed.
    #[error("generation failed: {message}")]
    Generation { message: String, retryable: bool },

    /// Malformed request (empty query, non-positive `top_k`/`max_tokens`).
    #[error("invalid request: {0}")]
    Validation(String),
}

impl ServeError {
    /// Taxonomy name reported to HTTP clients (e.g. `"EmbeddingError"`).
    pub fn kind(&self) -> &'static str {
        match self {
            ServeError::Embedding { .. } => "EmbeddingError",
            ServeError::IndexQuery { .. } => "IndexQueryError",
            ServeError::Generation { .. } => "GenerationError",
            ServeError::Validation(_) => "ValidationError",
        }
    }

    /// Machine-readable error code (e.g. `"embedding_error"`).
    pub fn code(&self) -> &'static str {
        match self {
            ServeError::Embedding { .. } => "embedding_error",
            ServeError::IndexQuery { .. } => "index_query_error",
            ServeError::Generation { .. } => "generation_error",
            ServeError::Validation(_) => "validation_error",
        }
    }

    /// Whether the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServeError::Embedding { retryable, .. }
            | ServeError::IndexQuery { retryable, .. }
            | ServeError::Generation { retryable, .. } => *retryable,
            ServeError::Validation(_) => false,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ServeError::Validation(message.into())
    }

    /// Classify a gateway failure as an embedding error.
    pub fn embedding(err: &anyhow::Error) -> Self {
        ServeError::Embedding {
            message: format!("{:#}", err),
            retryable: is_transient(err),
        }
    }

    /// Classify a gateway failure as an index query error.
    pub fn index_query(err: &anyhow::Error) -> Self {
        ServeError::IndexQuery {
            message: format!("{:#}", err),
            retryable: is_transient(err),
        }
    }

    /// Classify a gateway failure as a generation error.
    pub fn generation(err: &anyhow::Error) -> Self {
        ServeError::Generation {
            message: format!("{:#}", err),
            retryable: is_transient(err),
        }
    }
}

/// A non-success HTTP status returned by an upstream service.
#[derive(Debug, Error)]
#[error("{service} API error {status}: {body}")]
pub struct UpstreamStatus {
    pub service: &'static str,
    pub status: u16,
    pub body: String,
}

impl UpstreamStatus {
    /// Rate limits and server errors are transient; other 4xx are not.
    pub fn is_transient(&self) -> bool {
        self.status == 429 || self.status >= 500
    }
}

/// Returns true when any error in the chain is a transient upstream
/// condition: a timeout, a connection failure, HTTP 429, or HTTP 5xx.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(status) = cause.downcast_ref::<UpstreamStatus>() {
            return status.is_transient();
        }
        if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            return e.is_timeout() || e.is_connect();
        }
        false
    })
}
