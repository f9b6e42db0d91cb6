//! Typed error kinds shared across the engine.
//!
//! Per the error handling design, no error crosses a public API boundary
//! without being wrapped in [`CareError`], which carries a `kind`, an
//! optional file path, and an optional underlying cause. Collaborator
//! errors (SQLite, I/O, HTTP) are folded in via `#[source]`.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, CareError>;

#[derive(Debug, thiserror::Error)]
pub enum CareError {
    /// Embedding generation failed after exhausting retries. The caller
    /// should treat this as degraded mode (a `None` vector), not a hard
    /// failure, except where the spec marks it fatal (`indexProject`).
    #[error("embedding failed after retries{}", path_suffix(path))]
    TransientEmbeddingFailure {
        path: Option<PathBuf>,
        #[source]
        cause: Option<anyhow::Error>,
    },

    /// The vector store could not be reached or initialized. Fatal for
    /// indexing; individual retrieval branches downgrade to empty instead.
    #[error("vector store unavailable: {message}")]
    VectorStoreUnavailable {
        message: String,
        #[source]
        cause: Option<anyhow::Error>,
    },

    /// A stored record predates the `projectPath` column and needed the
    /// filesystem-probe isolation fallback. Recoverable; logged once.
    #[error("schema drift: legacy record missing projectPath")]
    SchemaDrift,

    /// Vector or FTS index (re)creation failed; queries continue with
    /// exact/brute-force search.
    #[error("index creation failed: {message}")]
    IndexCreationFailure { message: String },

    /// A file could not be read or stat'd during indexing. The file is
    /// counted as failed/skipped; the batch continues.
    #[error("file read error: {}", path.display())]
    FileReadError {
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },

    /// Catch-all for collaborator errors that must still cross the
    /// boundary typed (e.g. a malformed config, an unsupported query mode).
    #[error("{0}")]
    Other(String),
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" ({})", p.display()),
        None => String::new(),
    }
}

impl From<sqlx::Error> for CareError {
    fn from(e: sqlx::Error) -> Self {
        CareError::VectorStoreUnavailable {
            message: e.to_string(),
            cause: Some(anyhow::Error::new(e)),
        }
    }
}

impl From<anyhow::Error> for CareError {
    fn from(e: anyhow::Error) -> Self {
        CareError::Other(e.to_string())
    }
}

impl CareError {
    pub fn other(msg: impl Into<String>) -> Self {
        CareError::Other(msg.into())
    }
}
