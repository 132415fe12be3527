//! # RAG Harness CLI (`rag`)
//!
//! The `rag` binary serves the search and summarization API and offers
//! one-shot commands for trying the pipeline from a terminal.
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag serve` | Start the HTTP server |
//! | `rag search "<query>"` | Run one cached search |
//! | `rag summarize [TEXT]` | Stream a summary of TEXT (or stdin) |
//! | `rag bench "<query>"` | Repeat a search and report p50/p95 against the SLO |
//! | `rag completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # Serve offline with the hashing embedder and a local corpus
//! rag --demo --corpus ./data/demo_corpus.jsonl serve
//!
//! # Search against a configured Vertex AI index
//! rag search "what is retrieval augmented generation" --top-k 5
//!
//! # Check the latency objective with a warm cache
//! rag bench "what is AI?" --iterations 200
//! ```

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use rag_harness::config::{self, Config};
use rag_harness::{endpoint, server, stats, summarize};

/// RAG Harness: cached vector search and streamed summarization.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rag",
    about = "RAG Harness: cached vector search and streamed summarization",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    /// Ignore `--config` and run fully offline: hashing embedder,
    /// in-memory index, echo generator.
    #[arg(long, global = true)]
    demo: bool,

    /// JSONL corpus for the in-memory index (`{"id","text"}` or
    /// `{"id","vector"}` per line). Overrides `[index].path`.
    #[arg(long, global = true)]
    corpus: Option<PathBuf>,

    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Binds to `[server].bind` and serves `/search`, `/summarize`,
    /// `/cache/clear`, `/stats`, and `/health`.
    Serve {
        /// Override the bind address from config.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run one search and print the ranked matches.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of matches to return.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Stream a summary to stdout.
    Summarize {
        /// Text to summarize. Read from stdin when omitted.
        text: Option<String>,

        /// Upper bound on generated fragments.
        #[arg(long)]
        max_tokens: Option<usize>,
    },

    /// Repeat a search and report latency percentiles against the SLO.
    Bench {
        /// The search query string.
        query: String,

        #[arg(long, default_value_t = 100)]
        iterations: usize,

        #[arg(long)]
        top_k: Option<usize>,

        /// Clear the cache before every iteration so each call is a miss.
        #[arg(long)]
        no_cache: bool,
    },

    /// Print shell completions.
    Completions {
        shell: clap_complete::Shell,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rag_harness=info,tower_http=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn resolve_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut cfg = if cli.demo {
        Config::minimal()
    } else {
        config::load_config(&cli.config)?
    };
    if let Some(corpus) = &cli.corpus {
        cfg.index.provider = "memory".to_string();
        cfg.index.path = Some(corpus.clone());
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "rag", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing(cli.log_json);
    let mut cfg = resolve_config(&cli)?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            server::run_server(&cfg).await?;
        }
        Commands::Search { query, top_k } => {
            endpoint::run_search(&cfg, &query, top_k).await?;
        }
        Commands::Summarize { text, max_tokens } => {
            summarize::run_summarize(&cfg, text, max_tokens).await?;
        }
        Commands::Bench {
            query,
            iterations,
            top_k,
            no_cache,
        } => {
            stats::run_bench(&cfg, &query, iterations, top_k, no_cache).await?;
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
        }
    }

    Ok(())
}
