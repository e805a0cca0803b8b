use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("input file not found: {0:?}")]
    MissingInput(PathBuf),

    #[error("column '{column}' not found in {source_name}")]
    MissingColumn { column: String, source_name: String },

    #[error("unknown source '{0}'")]
    UnknownSource(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("circuit open after {0} consecutive failures")]
    CircuitOpen(u32),
}

pub type Result<T> = std::result::Result<T, Error>;
