//! Remote table abstraction
//!
//! A remote table is one named grid of string cells in a remote spreadsheet.
//! Every call takes the credential lease to authenticate with, so rotating a
//! credential never leaves a connection bound to the old one.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credentials::Credential;

/// Status codes that indicate a quota or rate limit
const RATE_LIMIT_STATUSES: [u16; 2] = [429, 403];

/// Message fragments that indicate a quota or rate limit
const RATE_LIMIT_KEYWORDS: [&str; 4] = ["rate limit", "quota", "too many requests", "user rate limit"];

/// Error returned by a remote table call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}{message}", status_prefix(.status))]
pub struct RemoteError {
    /// Transport status code, if the call got a response
    pub status: Option<u16>,
    /// Error text
    pub message: String,
}

fn status_prefix(status: &Option<u16>) -> String {
    status.map(|s| format!("status {}: ", s)).unwrap_or_default()
}

impl RemoteError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is due to rate limiting or quota exhaustion
    pub fn is_rate_limit(&self) -> bool {
        if let Some(status) = self.status
            && RATE_LIMIT_STATUSES.contains(&status)
        {
            return true;
        }

        let message = self.message.to_lowercase();
        RATE_LIMIT_KEYWORDS.iter().any(|keyword| message.contains(keyword))
    }
}

/// A single cell write in a batched update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellWrite {
    /// Cell address in A1 notation, relative to the table
    pub range: String,
    /// Raw value to store
    pub value: String,
}

impl CellWrite {
    pub fn new(range: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            range: range.into(),
            value: value.into(),
        }
    }
}

/// Operations the cache needs from a remote spreadsheet
pub trait RemoteTable: Send + Sync {
    /// Read every cell of a named table in one call
    fn read_all(&self, credential: &Credential, table_id: &str, table_name: &str)
    -> Result<Vec<Vec<String>>, RemoteError>;

    /// Read a single range (A1 notation, relative to the table)
    fn read_range(
        &self,
        credential: &Credential,
        table_id: &str,
        table_name: &str,
        range: &str,
    ) -> Result<Vec<Vec<String>>, RemoteError>;

    /// Write a batch of cells, returning the raw remote response
    fn batch_write(
        &self,
        credential: &Credential,
        table_id: &str,
        table_name: &str,
        writes: &[CellWrite],
    ) -> Result<serde_json::Value, RemoteError>;
}

/// Quote a table name the way the remote API expects in a range (`'My Sheet'!A1`)
pub fn absolute_range(table_name: &str, range: Option<&str>) -> String {
    let quoted = format!("'{}'", table_name.replace('\'', "''"));
    match range {
        Some(range) => format!("{}!{}", quoted, range),
        None => quoted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_by_status() {
        assert!(RemoteError::new(Some(429), "").is_rate_limit());
        assert!(RemoteError::new(Some(403), "forbidden").is_rate_limit());
        assert!(!RemoteError::new(Some(500), "internal").is_rate_limit());
        assert!(!RemoteError::new(Some(404), "not found").is_rate_limit());
    }

    #[test]
    fn test_rate_limit_by_message() {
        assert!(RemoteError::new(None, "Quota exceeded for quota metric 'Read requests'").is_rate_limit());
        assert!(RemoteError::new(Some(400), "Rate Limit hit").is_rate_limit());
        assert!(RemoteError::new(None, "TOO MANY REQUESTS").is_rate_limit());
        assert!(!RemoteError::new(None, "connection reset by peer").is_rate_limit());
    }

    #[test]
    fn test_display() {
        assert_eq!(RemoteError::new(Some(429), "slow down").to_string(), "status 429: slow down");
        assert_eq!(RemoteError::new(None, "offline").to_string(), "offline");
    }

    #[test]
    fn test_absolute_range() {
        assert_eq!(absolute_range("Sheet1", None), "'Sheet1'");
        assert_eq!(absolute_range("Sheet1", Some("A1:B2")), "'Sheet1'!A1:B2");
        assert_eq!(absolute_range("Bob's", Some("C3")), "'Bob''s'!C3");
    }
}
