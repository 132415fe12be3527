//! Generation gateway implementations.
//!
//! - **[`DisabledGenerator`]**: fails on start.
//! - **[`OpenAIGenerator`]**: chat completions with `stream: true` (SSE).
//! - **[`OllamaGenerator`]**: `/api/generate` with NDJSON streaming.
//! - **[`EchoGenerator`]**: replays the request content word by word.
//!
//! Streams are pulled by the consumer. Dropping a stream drops the HTTP
//! response body, which closes the upstream connection.

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};

use super::{check_status, FragmentStream, GenerationGateway, GenerationRequest};
use crate::config::GenerationConfig;

fn build_client(config: &GenerationConfig) -> Result<reqwest::Client> {
    // no total timeout: the body streams for as long as generation runs
    Ok(reqwest::Client::builder()
        .connect_timeout(config.timeout())
        .build()?)
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl GenerationGateway for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _request: GenerationRequest) -> Result<FragmentStream> {
        bail!("Generation provider is disabled")
    }
}

// ============ OpenAI ============

/// Streaming chat completions against the OpenAI API (or a compatible
/// server via `generation.url`).
pub struct OpenAIGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
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
            url,
        })
    }
}

#[async_trait]
impl GenerationGateway for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerationRequest) -> Result<FragmentStream> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.content },
            ],
            "max_tokens": request.max_tokens,
            "stream": true,
        });
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = check_status("OpenAI", response).await?;

        Ok(line_stream(response.bytes_stream())
            .filter_map(|line| async move {
                match line {
                    Ok(line) => parse_openai_sse_line(&line).transpose(),
                    Err(e) => Some(Err(e)),
                }
            })
            .boxed())
    }
}

/// Parse one line of an OpenAI SSE body into an optional content fragment.
///
/// Non-`data:` lines, the `[DONE]` sentinel, and deltas without content
/// yield `None`. A `data:` payload carrying an `error` object is an error.
fn parse_openai_sse_line(line: &str) -> Result<Option<String>> {
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let payload = payload.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return Ok(None);
    }

    let json: serde_json::Value = serde_json::from_str(payload)?;
    if let Some(err) = json.get("error") {
        bail!("OpenAI stream error: {}", err);
    }
    let content = json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    Ok(content)
}

// ============ Ollama ============

/// Streaming generation against a local Ollama instance.
pub struct OllamaGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            client: build_client(config)?,
            model,
            url,
        })
    }
}

#[async_trait]
impl GenerationGateway for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerationRequest) -> Result<FragmentStream> {
        let body = serde_json::json!({
            "model": self.model,
            "system": request.system,
            "prompt": request.content,
            "stream": true,
            "options": { "num_predict": request.max_tokens },
        });
        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                anyhow::Error::new(e).context(format!(
                    "Ollama connection error (is Ollama running at {}?)",
                    self.url
                ))
            })?;
        let response = check_status("Ollama", response).await?;

        Ok(line_stream(response.bytes_stream())
            .filter_map(|line| async move {
                match line {
                    Ok(line) => parse_ollama_line(&line).transpose(),
                    Err(e) => Some(Err(e)),
                }
            })
            .boxed())
    }
}

/// Parse one NDJSON line of an Ollama generate stream.
fn parse_ollama_line(line: &str) -> Result<Option<String>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let json: serde_json::Value = serde_json::from_str(line)?;
    if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
        bail!("Ollama stream error: {}", err);
    }
    Ok(json
        .get("response")
        .and_then(|r| r.as_str())
        .filter(|r| !r.is_empty())
        .map(str::to_string))
}

// ============ Echo ============

/// Replays the request content as word fragments, at most `max_tokens` of
/// them.
#[derive(Debug, Default)]
pub struct EchoGenerator;

#[async_trait]
impl GenerationGateway for EchoGenerator {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<FragmentStream> {
        let fragments: Vec<String> = request
            .content
            .split_whitespace()
            .take(request.max_tokens)
            .enumerate()
            .map(|(i, w)| if i == 0 { w.to_string() } else { format!(" {}", w) })
            .collect();

        Ok(stream::iter(fragments.into_iter().map(Ok::<_, anyhow::Error>)).boxed())
    }
}

// ============ Line framing ============

/// Split a chunked byte stream into text lines (without trailing `\r\n`).
///
/// A transport error ends the stream after being yielded once.
fn line_stream<S, B>(body: S) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    struct State<S> {
        body: std::pin::Pin<Box<S>>,
        buf: Vec<u8>,
        done: bool,
    }

    let state = State {
        body: Box::pin(body),
        buf: Vec::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(pos) = st.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = st.buf.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                return Some((Ok(text), st));
            }
            if st.done {
                if st.buf.is_empty() {
                    return None;
                }
                let rest = std::mem::take(&mut st.buf);
                let text = String::from_utf8_lossy(&rest).trim_end().to_string();
                return Some((Ok(text), st));
            }
            match st.body.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    st.done = true;
                    st.buf.clear();
                    return Some((Err(e.into()), st));
                }
                None => st.done = true,
            }
        }
    })
    .boxed()
}
