//! SQLite connection pool setup.

use crate::config::StoreConfig;
use crate::error::{CareError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

pub async fn connect(config: &StoreConfig) -> Result<SqlitePool> {
    let db_path = config.data_dir.join("care.sqlite3");

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CareError::FileReadError {
            path: parent.to_path_buf(),
            cause: e,
        })?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
        .map_err(|e| CareError::VectorStoreUnavailable {
            message: e.to_string(),
            cause: Some(anyhow::Error::new(e)),
        })?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
