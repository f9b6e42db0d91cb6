//! care-engine: embeds a codebase, its documentation, and its PR comment
//! history into a local vector store, and assembles ranked retrieval
//! context for a code-review LLM wrapper.
//!
//! The public surface is the four pipeline stages described in the design
//! docs: [`indexer`] populates the store, [`retriever`] answers a
//! single-file context query, and [`aggregator`] fans that out across a
//! whole pull request. Everything else ([`config`], [`db`], [`store`],
//! [`embedding`]) is ambient infrastructure those three stages share.

pub mod aggregator;
pub mod chunk;
pub mod config;
pub mod context_infer;
pub mod db;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod models;
pub mod paths;
pub mod retriever;
pub mod store;

/// Installs a `tracing` subscriber reading verbosity from `RUST_LOG`
/// (`info` by default). Call once, from `main`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
