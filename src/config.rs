//! TOML configuration parsing.
//!
//! Every section except `[server]` is optional and falls back to defaults.
//! [`load_config`] validates the parsed values before returning them, so the
//! rest of the crate can rely on positive capacities, timeouts, and result
//! counts.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [cache]
//! ttl_secs = 300
//! max_entries = 1024
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [index]
//! provider = "vertex"
//! project = "my-project"
//! location = "us-central1"
//! endpoint_id = "1234567890"
//! deployed_index_id = "docs_index"
//!
//! [generation]
//! provider = "openai"
//! model = "gpt-4o-mini"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_ttl_secs() -> u64 {
    300
}
fn default_max_entries() -> usize {
    1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
    /// Latency objective for the 95th percentile, in milliseconds.
    #[serde(default = "default_slo_p95_ms")]
    pub slo_p95_ms: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            slo_p95_ms: default_slo_p95_ms(),
        }
    }
}

fn default_top_k() -> usize {
    10
}
fn default_max_top_k() -> usize {
    100
}
fn default_slo_p95_ms() -> f64 {
    120.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `disabled`, `openai`, `ollama`, `vertex`, or `hash`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama, or an OpenAI-compatible proxy).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Environment variable holding a Google Cloud bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            project: None,
            location: None,
            token_env: default_token_env(),
            timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_token_env() -> String {
    "GOOGLE_CLOUD_ACCESS_TOKEN".to_string()
}
fn default_gateway_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `memory` or `vertex`.
    #[serde(default = "default_index_provider")]
    pub provider: String,
    /// JSONL corpus for the `memory` provider.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub endpoint_id: Option<String>,
    #[serde(default)]
    pub deployed_index_id: Option<String>,
    /// Public endpoint host (`*.vdb.vertexai.goog`), if the index endpoint
    /// is public.
    #[serde(default)]
    pub public_domain: Option<String>,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            provider: default_index_provider(),
            path: None,
            project: None,
            location: None,
            endpoint_id: None,
            deployed_index_id: None,
            public_domain: None,
            token_env: default_token_env(),
            timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

impl IndexConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_index_provider() -> String {
    "memory".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `disabled`, `openai`, `ollama`, or `echo`.
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Used when a request does not set `max_tokens`.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Upper bound on the wait for each fragment.
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            url: None,
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_max_tokens() -> usize {
    512
}
fn default_generation_timeout_secs() -> u64 {
    60
}
fn default_channel_capacity() -> usize {
    16
}

impl Config {
    /// Offline configuration: hashing embedder, in-memory index, echo
    /// generator. Used by `rag serve --demo` and tests.
    pub fn minimal() -> Self {
        Self {
            server: ServerConfig {
                bind: "127.0.0.1:8080".to_string(),
            },
            cache: CacheConfig::default(),
            search: SearchConfig::default(),
            embedding: EmbeddingConfig {
                provider: "hash".to_string(),
                dims: Some(256),
                ..EmbeddingConfig::default()
            },
            index: IndexConfig::default(),
            generation: GenerationConfig {
                provider: "echo".to_string(),
                ..GenerationConfig::default()
            },
        }
    }

    /// Validate value ranges and provider-specific requirements.
    pub fn validate(&self) -> Result<()> {
        if self.cache.ttl_secs == 0 {
            bail!("cache.ttl_secs must be > 0");
        }
        if self.cache.max_entries == 0 {
            bail!("cache.max_entries must be > 0");
        }

        if self.search.default_top_k == 0 {
            bail!("search.default_top_k must be > 0");
        }
        if self.search.max_top_k < self.search.default_top_k {
            bail!("search.max_top_k must be >= search.default_top_k");
        }
        if !(self.search.slo_p95_ms > 0.0) {
            bail!("search.slo_p95_ms must be > 0");
        }

        match self.embedding.provider.as_str() {
            "disabled" | "hash" => {}
            "openai" | "ollama" => {
                if self.embedding.model.is_none() {
                    bail!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
            }
            "vertex" => {
                if self.embedding.model.is_none() || self.embedding.project.is_none() {
                    bail!("embedding.model and embedding.project are required for vertex");
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, vertex, or hash.",
                other
            ),
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.timeout_secs == 0 {
            bail!("embedding.timeout_secs must be > 0");
        }

        match self.index.provider.as_str() {
            "memory" => {}
            "vertex" => {
                let missing: Vec<&str> = [
                    ("project", &self.index.project),
                    ("location", &self.index.location),
                    ("endpoint_id", &self.index.endpoint_id),
                    ("deployed_index_id", &self.index.deployed_index_id),
                ]
                .iter()
                .filter(|(_, v)| v.is_none())
                .map(|(k, _)| *k)
                .collect();
                if !missing.is_empty() {
                    bail!("index provider 'vertex' requires: {}", missing.join(", "));
                }
            }
            other => bail!(
                "Unknown index provider: '{}'. Must be memory or vertex.",
                other
            ),
        }
        if self.index.timeout_secs == 0 {
            bail!("index.timeout_secs must be > 0");
        }

        match self.generation.provider.as_str() {
            "disabled" | "echo" => {}
            "openai" | "ollama" => {
                if self.generation.model.is_none() {
                    bail!(
                        "generation.model must be specified when provider is '{}'",
                        self.generation.provider
                    );
                }
            }
            other => bail!(
                "Unknown generation provider: '{}'. Must be disabled, openai, ollama, or echo.",
                other
            ),
        }
        if self.generation.max_tokens == 0 {
            bail!("generation.max_tokens must be > 0");
        }
        if self.generation.timeout_secs == 0 {
            bail!("generation.timeout_secs must be > 0");
        }
        if self.generation.channel_capacity == 0 {
            bail!("generation.channel_capacity must be > 0");
        }

        Ok(())
    }
}

/// Parse configuration from a TOML string and validate it.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}
