//! Streamed summarization with trailing timing metadata.
//!
//! [`Summarizer::summarize`] spawns a producer task that pulls fragments
//! from the [`GenerationGateway`] and writes [`StreamEvent`]s onto a bounded
//! channel. The consumer (the SSE handler or the CLI) reads them through a
//! [`SummaryStream`].
//!
//! Event order for a completed request:
//!
//! ```text
//! Content* Final
//! ```
//!
//! A failed request yields `Content* Err(GenerationError)` and nothing after
//! it, so callers can tell "finished" from "aborted".
//!
//! Dropping the [`SummaryStream`] closes the channel. The producer notices
//! on its next send or while waiting for a fragment, drops the upstream
//! fragment stream, and exits.

use anyhow::Result;
use futures::stream::{BoxStream, StreamExt};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::Config;
use crate::error::ServeError;
use crate::gateway::{GenerationGateway, GenerationRequest};
use crate::models::StreamEvent;
use crate::server::AppState;

/// Instruction sent with every summarization request.
pub const SYSTEM_PROMPT: &str = "Summarize the following content concisely.";

type EventResult = Result<StreamEvent, ServeError>;

/// Drives a [`GenerationGateway`] and frames its output as events.
pub struct Summarizer {
    generator: Arc<dyn GenerationGateway>,
    default_max_tokens: usize,
    /// Bound on the wait for each fragment (and for the stream to start).
    fragment_timeout: Duration,
    channel_capacity: usize,
}

impl Summarizer {
    pub fn new(
        generator: Arc<dyn GenerationGateway>,
        default_max_tokens: usize,
        fragment_timeout: Duration,
        channel_capacity: usize,
    ) -> Self {
        Self {
            generator,
            default_max_tokens,
            fragment_timeout,
            channel_capacity: channel_capacity.max(1),
        }
    }

    pub fn model_name(&self) -> &str {
        self.generator.model_name()
    }

    /// Start summarizing `content`.
    ///
    /// Validation happens here, before anything is spawned. `cache_hit` is
    /// the cache status of the search call that produced `content` and is
    /// reported unchanged in the final event.
    pub fn summarize(
        &self,
        content: &str,
        max_tokens: Option<usize>,
        cache_hit: bool,
    ) -> Result<SummaryStream, ServeError> {
        if content.trim().is_empty() {
            return Err(ServeError::validation("content must not be empty"));
        }
        let max_tokens = max_tokens.unwrap_or(self.default_max_tokens);
        if max_tokens == 0 {
            return Err(ServeError::validation(
                "max_tokens must be a positive integer",
            ));
        }

        let request_id = Uuid::new_v4();
        let request = GenerationRequest {
            system: SYSTEM_PROMPT.to_string(),
            content: content.to_string(),
            max_tokens,
        };
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let producer = Producer {
            generator: Arc::clone(&self.generator),
            fragment_timeout: self.fragment_timeout,
            cache_hit,
            request_id,
            tx,
        };
        tokio::spawn(producer.run(request));

        Ok(SummaryStream { rx, request_id })
    }
}

/// Consumer side of a summarization request.
pub struct SummaryStream {
    rx: mpsc::Receiver<EventResult>,
    request_id: Uuid,
}

impl SummaryStream {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Next event, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<EventResult> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> BoxStream<'static, EventResult> {
        futures::stream::unfold(self.rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed()
    }

    /// Drain the stream into a vector. Stops after the first error.
    pub async fn collect(mut self) -> Vec<EventResult> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            let stop = event.is_err();
            events.push(event);
            if stop {
                break;
            }
        }
        events
    }
}

struct Producer {
    generator: Arc<dyn GenerationGateway>,
    fragment_timeout: Duration,
    cache_hit: bool,
    request_id: Uuid,
    tx: mpsc::Sender<EventResult>,
}

impl Producer {
    async fn run(self, request: GenerationRequest) {
        let t0 = Instant::now();
        let mut t_last = t0;
        let mut fragments = 0usize;

        let started = tokio::select! {
            _ = self.tx.closed() => return self.cancelled(fragments),
            r = tokio::time::timeout(self.fragment_timeout, self.generator.generate(request)) => r,
        };
        let mut stream = match started {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return self.fail(ServeError::generation(&e), fragments).await,
            Err(_) => return self.fail(self.timed_out(), fragments).await,
        };

        loop {
            let next = tokio::select! {
                _ = self.tx.closed() => return self.cancelled(fragments),
                r = tokio::time::timeout(self.fragment_timeout, stream.next()) => r,
            };
            match next {
                Ok(Some(Ok(text))) => {
                    t_last = Instant::now();
                    fragments += 1;
                    if self.tx.send(Ok(StreamEvent::Content { text })).await.is_err() {
                        return self.cancelled(fragments);
                    }
                }
                Ok(Some(Err(e))) => {
                    return self.fail(ServeError::generation(&e), fragments).await
                }
                Ok(None) => break,
                Err(_) => return self.fail(self.timed_out(), fragments).await,
            }
        }
        drop(stream);

        let time_to_last_token_ms = ms_between(t0, t_last);
        let total_time_ms = ms_between(t0, Instant::now()).max(time_to_last_token_ms);
        tracing::info!(
            request_id = %self.request_id,
            fragments,
            time_to_last_token_ms,
            total_time_ms,
            cache_hit = self.cache_hit,
            "summary complete"
        );
        let _ = self
            .tx
            .send(Ok(StreamEvent::Final {
                cache_hit: self.cache_hit,
                total_time_ms,
                time_to_last_token_ms,
            }))
            .await;
    }

    fn timed_out(&self) -> ServeError {
        ServeError::Generation {
            message: format!(
                "no fragment within {}ms",
                self.fragment_timeout.as_millis()
            ),
            retryable: true,
        }
    }

    async fn fail(&self, err: ServeError, fragments: usize) {
        tracing::warn!(
            request_id = %self.request_id,
            fragments,
            error = %err,
            "summary aborted"
        );
        let _ = self.tx.send(Err(err)).await;
    }

    fn cancelled(&self, fragments: usize) {
        tracing::debug!(
            request_id = %self.request_id,
            fragments,
            "consumer went away, stopping generation"
        );
    }
}

fn ms_between(from: Instant, to: Instant) -> f64 {
    to.saturating_duration_since(from).as_secs_f64() * 1000.0
}

/// Run the summarize command: stream a summary of `text` (or stdin) to
/// stdout, then print its timing metadata.
pub async fn run_summarize(
    config: &Config,
    text: Option<String>,
    max_tokens: Option<usize>,
) -> Result<()> {
    let content = match text {
        Some(t) => t,
        None => std::io::read_to_string(std::io::stdin())?,
    };
    let state = AppState::from_config(config).await?;
    let mut stream = state.summarizer.summarize(&content, max_tokens, false)?;

    let mut stdout = std::io::stdout();
    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::Content { text } => {
                write!(stdout, "{}", text)?;
                stdout.flush()?;
            }
            StreamEvent::Final {
                total_time_ms,
                time_to_last_token_ms,
                ..
            } => {
                println!();
                println!();
                println!(
                    "time to last token: {:.2} ms, total: {:.2} ms",
                    time_to_last_token_ms, total_time_ms
                );
            }
        }
    }
    Ok(())
}
