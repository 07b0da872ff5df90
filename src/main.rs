//! # Cora CLI
//!
//! The `cora` binary drives both halves of the service:
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cora index` | Additive upsert of the data tree into the vector store |
//! | `cora index --reset` | Destroy the collection, then reindex |
//! | `cora index --stats` | Print record count and store location, no modification |
//! | `cora serve` | Start the HTTP service |
//!
//! All commands accept `--config <path>` (TOML); every setting also has
//! an environment override (`OLLAMA_HOST`, `TRANSLATOR_API_URL`,
//! `MODEL_NAME`, `CORA_STORE_DIR`, `SESSION_TTL_SECONDS`, `MAX_TURNS`,
//! `CORA_PORT`), so a config file is optional.
//!
//! The indexer must not run while the server is serving from the same
//! store directory; SQLite's write lock is the only guard.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use cora::classifier::Classifier;
use cora::config::{self, Config};
use cora::embedding;
use cora::engine::QaEngine;
use cora::indexer;
use cora::llm::OllamaClient;
use cora::retriever::Retriever;
use cora::server::{self, AppState};
use cora::session::SessionManager;
use cora::store::VectorStore;
use cora::translator::Translator;

#[derive(Parser)]
#[command(
    name = "cora",
    about = "Cora — multilingual RAG Q&A and ticket classification for telecom support",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Optional; environment
    /// variables cover every setting.
    #[arg(long, global = true, default_value = "./config/cora.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the knowledge base data tree into the vector store.
    ///
    /// Walks the data directory for article JSON files and PDF
    /// documents, chunks and embeds them, and upserts idempotently.
    /// Per-item parse errors are reported but do not fail the run.
    Index {
        /// Destroy the collection before indexing.
        #[arg(long)]
        reset: bool,

        /// Print collection statistics and exit without modifying anything.
        #[arg(long)]
        stats: bool,

        /// Data directory to index (defaults to the configured one).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Start the HTTP service.
    Serve {
        /// Port override (default from config / CORA_PORT, then 8001).
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Index {
            reset,
            stats,
            data_dir,
        } => {
            let store = open_store(&config).await?;

            if stats {
                let count = store.count().await?;
                println!("Vector store statistics:");
                println!("  collection: {}", cora::store::COLLECTION);
                println!("  records: {}", count);
                println!("  location: {}", store.location().display());
                return Ok(());
            }

            let data_dir = data_dir.unwrap_or_else(|| config.indexing.data_dir.clone());
            let report = indexer::run_index(&store, &config, &data_dir, reset).await?;

            let count = store.count().await?;
            println!("Final statistics:");
            println!("  records written this run: {}", report.records_written);
            println!("  total in vector store: {}", count);
            println!("  location: {}", store.location().display());
        }
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.server.port);
            let state = build_state(config).await?;
            server::run_server(state, port).await?;
        }
    }

    Ok(())
}

async fn open_store(config: &Config) -> Result<VectorStore> {
    let embedder = embedding::create_provider(&config.llm.host, &config.embedding)?;
    Ok(VectorStore::open(&config.store.dir, embedder).await?)
}

/// Constructs the process-wide component graph once; handlers receive it
/// behind `Arc`s rather than reaching for ambient state.
async fn build_state(config: Config) -> Result<AppState> {
    let config = Arc::new(config);
    let store = Arc::new(open_store(&config).await?);
    let retriever = Arc::new(Retriever::new(Arc::clone(&store), &config));
    let translator = Arc::new(Translator::new(&config.translator));
    let sessions = Arc::new(SessionManager::new(config.session.ttl_secs));
    let llm: Arc<dyn cora::llm::LlmClient> = Arc::new(OllamaClient::new(&config.llm.host));

    let engine = Arc::new(QaEngine::new(
        Arc::clone(&retriever),
        translator,
        sessions,
        Arc::clone(&llm),
        Arc::clone(&config),
    ));
    let classifier = Arc::new(Classifier::new(retriever, llm, config));

    Ok(AppState { engine, classifier })
}
