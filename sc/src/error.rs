//! Error types for the sheet cache

use std::path::PathBuf;
use thiserror::Error;

use crate::remote::RemoteError;

/// Errors that can occur while reading or writing through the cache
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credentials directory does not exist: {0}")]
    MissingCredentialsDir(PathBuf),

    #[error("No credential files found in {0}")]
    NoCredentials(PathBuf),

    #[error("Table not registered: {table_id} - {table_name}")]
    NotFound { table_id: String, table_name: String },

    #[error("Rate limited after {attempts} attempt(s): {source}")]
    RateLimited { attempts: u32, source: RemoteError },

    #[error("Remote operation failed: {0}")]
    Remote(RemoteError),

    #[error("Invalid cell address '{0}'")]
    Address(String),

    #[error("Snapshot error at {path}: {message}")]
    Snapshot { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CacheError {
    /// Check if this error exhausted the rate-limit retry budget
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, CacheError::RateLimited { .. })
    }

    /// Check if this error is a startup-time configuration failure
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            CacheError::Config(_)
                | CacheError::MissingCredentialsDir(_)
                | CacheError::NoCredentials(_)
                | CacheError::NotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
