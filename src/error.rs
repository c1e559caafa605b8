// ABOUTME: Error taxonomy for export, import, schema and migration operations
// ABOUTME: Validation and configuration errors are raised immediately, never downgraded

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors produced by the transfer layer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A WHERE clause was rejected by the safety validator or could not be parsed.
    #[error("Invalid WHERE clause: {0}")]
    Validation(String),

    /// Unsupported format, adapter, conflict mode or missing configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// File read, write, compression or decompression failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed row or statement in an input file.
    #[error("Data error: {0}")]
    Data(String),

    /// Target database is not in a state that allows the operation.
    #[error("State error: {0}")]
    State(String),

    /// Statement execution or connection failure reported by the driver.
    #[error("Database error: {0}")]
    Database(String),

    #[error("I/O error: {0}")]
    RawIo(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl TransferError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        TransferError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn database(context: impl std::fmt::Display, cause: impl std::fmt::Display) -> Self {
        TransferError::Database(format!("{}: {}", context, cause))
    }

    /// Validation and configuration errors are never accumulated as per-row errors.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransferError::Validation(_) | TransferError::Configuration(_)
        )
    }
}

impl From<rusqlite::Error> for TransferError {
    fn from(err: rusqlite::Error) -> Self {
        TransferError::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
