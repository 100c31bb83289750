use std::{path::PathBuf, time::Duration};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    mnemo_config::{EmbeddingsConfig, EmbeddingsProvider, EmptyDocument, MnemoConfig},
    mnemo_memory::{
        EmptyDocumentPolicy, MemoryConfig, MemoryManager, chunker::ChunkerOptions,
        embeddings::EmbeddingProvider, embeddings_openai::OpenAiEmbeddingProvider,
        search::SearchResult,
    },
    secrecy::ExposeSecret,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, prelude::*},
};

#[derive(Parser)]
#[command(name = "mnemo", version, about = "Local markdown memory with hybrid search")]
struct Cli {
    /// Path to mnemo.toml (defaults to discovery).
    #[arg(long, global = true, env = "MNEMO_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter, e.g. `info` or `mnemo_memory=debug`.
    #[arg(long, global = true, env = "RUST_LOG", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the workspace, or a single document.
    Index {
        /// Workspace-relative document id, e.g. `memory/2024-01-15.md`.
        #[arg(long)]
        file: Option<String>,
        /// Afterwards, embed chunks stored without a vector.
        #[arg(long)]
        backfill: bool,
    },
    /// Search indexed memory.
    Search {
        query: String,
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,
        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show index statistics.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Index, then keep the index current as files change.
    #[cfg(feature = "file-watcher")]
    Watch,
}

fn init_telemetry(cli: &Cli) {
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

fn memory_config(config: &MnemoConfig) -> MemoryConfig {
    let memory = &config.memory;
    MemoryConfig {
        db_path: memory
            .db_path
            .clone()
            .unwrap_or_else(|| mnemo_config::data_dir().join("memory.db")),
        workspace_dir: memory.workspace_dir.clone(),
        memory_files: memory.memory_files.clone(),
        memory_dirs: memory.memory_dirs.clone(),
        chunker: ChunkerOptions {
            target_tokens: memory.chunk_tokens,
            overlap_tokens: memory.chunk_overlap_tokens,
            chars_per_token: memory.chars_per_token,
        },
        vector_weight: memory.vector_weight,
        keyword_weight: memory.keyword_weight,
        candidate_multiplier: memory.candidate_multiplier,
        search_timeout: Duration::from_secs(memory.search_timeout_secs),
        embed_batch_size: config.embeddings.batch_size,
        embed_timeout: Duration::from_secs(config.embeddings.timeout_secs),
        empty_document: match memory.empty_document {
            EmptyDocument::Purge => EmptyDocumentPolicy::Purge,
            EmptyDocument::Keep => EmptyDocumentPolicy::Keep,
        },
    }
}

/// `None` runs lexical-only: either disabled, or no API key available.
fn embedding_provider(config: &EmbeddingsConfig) -> Option<Box<dyn EmbeddingProvider>> {
    if config.provider == EmbeddingsProvider::None {
        return None;
    }
    let Some(api_key) = &config.api_key else {
        warn!("no embeddings API key configured, falling back to keyword search only");
        return None;
    };

    let mut provider = OpenAiEmbeddingProvider::new(api_key.expose_secret().clone())
        .with_timeout(Duration::from_secs(config.timeout_secs));
    if let Some(url) = &config.base_url {
        provider = provider.with_base_url(url);
    }
    if let Some(model) = &config.model {
        provider = provider.with_model(model.as_str(), config.dimensions.unwrap_or(1536));
    }
    Some(Box::new(provider))
}

fn print_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("no results");
        return;
    }
    for (rank, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.3}] {}:{}-{}",
            rank + 1,
            result.score,
            result.source_file,
            result.line_start,
            result.line_end
        );
        for line in result.content.lines().take(3) {
            println!("     {line}");
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = mnemo_config::load(cli.config.as_deref()).context("loading configuration")?;
    let manager = MemoryManager::open(
        memory_config(&config),
        embedding_provider(&config.embeddings),
    )
    .await?;

    match cli.command {
        Commands::Index { file, backfill } => {
            match file {
                Some(file) => {
                    let embedded = manager.index_file(&file).await?;
                    info!(file = %file, embedded, "indexed");
                },
                None => {
                    let report = manager.sync().await?;
                    println!("{}", serde_json::to_string_pretty(&report)?);
                },
            }
            if backfill {
                let filled = manager.backfill_embeddings().await?;
                info!(filled, "backfilled embeddings");
            }
        },
        Commands::Search { query, top_k, json } => {
            let results = manager.search(&query, top_k).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_results(&results);
            }
        },
        Commands::Status { json } => {
            let status = manager.status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("files:           {}", status.total_files);
                println!("chunks:          {}", status.total_chunks);
                println!("embedded chunks: {}", status.embedded_chunks);
                println!("cache entries:   {}", status.cache_entries);
                println!(
                    "embedding model: {}",
                    status.embedding_model.as_deref().unwrap_or("none (keyword only)")
                );
            }
        },
        #[cfg(feature = "file-watcher")]
        Commands::Watch => {
            let report = manager.sync().await?;
            info!(
                indexed = report.files_indexed,
                errors = report.errors,
                "initial index complete"
            );
            let source = manager.config().workspace_source();
            let debounce = Duration::from_millis(config.memory.watch_debounce_ms);
            let manager = std::sync::Arc::new(manager);
            mnemo_memory::watcher::watch_workspace(manager, source, debounce, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "failed to listen for ctrl-c");
                }
            })
            .await?;
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_telemetry(&cli);
    run(cli).await
}
