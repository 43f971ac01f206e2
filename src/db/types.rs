//! Shared type definitions for the database layer.

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Failed to encode or decode a JSON column: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Invalid timestamp in column: {0}")]
    Timestamp(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
pub fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Timestamp(format!("{raw}: {e}")))
}

pub fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>, DbError> {
    raw.as_deref().map(parse_ts).transpose()
}
