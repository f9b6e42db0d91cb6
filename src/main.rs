//! `care` — the thin CLI collaborator over the `care_engine` library.
//!
//! Mirrors the teacher's `ctx` binary: argument parsing is not part of the
//! tested core, the `Config` it loads is.

use care_engine::aggregator::{PrAggregator, PrFile};
use care_engine::config;
use care_engine::embedding::cache::CacheRegistry;
use care_engine::embedding::create_provider;
use care_engine::indexer::Indexer;
use care_engine::paths::is_test_file;
use care_engine::retriever::{ContextRetriever, RetrieverOptions};
use care_engine::store::SqliteStore;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "care", about = "CARE engine — context-augmented retrieval for code review", version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./care.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a project directory
    Index {
        /// Project root to index (defaults to `project.path` from config)
        path: Option<PathBuf>,

        /// Only (re)index these files, relative to the project root
        #[arg(long)]
        files: Vec<PathBuf>,
    },

    /// Assemble review context for a single file
    Review {
        /// File to review, relative to the project root
        file: PathBuf,

        /// Treat the file as a test file regardless of its path
        #[arg(long)]
        is_test_file: bool,
    },

    /// Assemble unified review context for a set of pull-request files
    Pr {
        /// Files touched by the pull request, relative to the project root
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    care_engine::init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    let store = Arc::new(SqliteStore::connect(&cfg.store).await?);
    let embedder = create_provider(&cfg.embedding)?;

    match cli.command {
        Commands::Index { path, files } => {
            let mut project = cfg.project.clone();
            if let Some(path) = path {
                project.path = path;
            }
            let indexer = Indexer::new(store, embedder);
            let summary = indexer.index_project(&project, &files, cfg.embedding.batch_size).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Review { file, is_test_file: force_test } => {
            let content = tokio::fs::read_to_string(cfg.project.path.join(&file)).await?;
            let caches = CacheRegistry::new(&cfg.embedding);
            let retriever = ContextRetriever::new(store, embedder, caches, cfg.retrieval);

            let project_path = cfg.project.path.to_string_lossy().to_string();
            let file_str = file.to_string_lossy().to_string();
            let override_flag = Some(force_test || is_test_file(&file_str));
            let options = RetrieverOptions {
                project_path: &project_path,
                is_test_file_override: override_flag,
                cancel: CancellationToken::new(),
            };

            let bundle = retriever.get_context(&file_str, &content, options).await?;
            println!("{}", serde_json::to_string_pretty(&bundle)?);
        }
        Commands::Pr { files } => {
            let caches = CacheRegistry::new(&cfg.embedding);
            let retriever = Arc::new(ContextRetriever::new(store, embedder, caches, cfg.retrieval));
            let aggregator = PrAggregator::new(retriever, cfg.aggregator);

            let mut pr_files = Vec::with_capacity(files.len());
            for file in &files {
                let content = tokio::fs::read_to_string(cfg.project.path.join(file)).await?;
                let path = file.to_string_lossy().to_string();
                let is_test_file_override = Some(is_test_file(&path));
                pr_files.push(PrFile { path, content, is_test_file_override });
            }

            let project_path = cfg.project.path.to_string_lossy().to_string();
            let bundle = aggregator.gather_unified_context_for_pr(&project_path, &pr_files).await?;
            println!("{}", serde_json::to_string_pretty(&bundle)?);
        }
    }

    Ok(())
}
