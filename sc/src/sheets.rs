//! Spreadsheet values API client
//!
//! Blocking HTTP implementation of [`RemoteTable`] against a Google Sheets v4
//! style values API. Each call authenticates with the bearer secret of the
//! credential lease it is given.

use reqwest::Url;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::credentials::Credential;
use crate::remote::{CellWrite, RemoteError, RemoteTable, absolute_range};

/// Default base URL of the values API
pub const DEFAULT_API_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

pub struct SheetsClient {
    base_url: Url,
    http: Client,
}

impl SheetsClient {
    pub fn new(base_url: &str) -> Result<Self, RemoteError> {
        debug!(%base_url, "SheetsClient::new: called");
        let base_url = Url::parse(base_url).map_err(|e| RemoteError::new(None, format!("invalid api url: {}", e)))?;
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::new(None, e.to_string()))?;
        Ok(Self { base_url, http })
    }

    fn url(&self, table_id: &str, tail: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::new(None, "api url cannot be a base"))?
            .pop_if_empty()
            .push(table_id)
            .extend(tail);
        Ok(url)
    }

    fn get_values(&self, credential: &Credential, table_id: &str, range: &str) -> Result<Vec<Vec<String>>, RemoteError> {
        let url = self.url(table_id, &["values", range])?;
        debug!(%url, credential = %credential.id(), "get_values: sending request");

        let response = self
            .http
            .get(url)
            .bearer_auth(credential.secret())
            .send()
            .map_err(transport_error)?;
        let body: ValueRange = check(response)?.json().map_err(transport_error)?;

        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }
}

impl RemoteTable for SheetsClient {
    fn read_all(
        &self,
        credential: &Credential,
        table_id: &str,
        table_name: &str,
    ) -> Result<Vec<Vec<String>>, RemoteError> {
        self.get_values(credential, table_id, &absolute_range(table_name, None))
    }

    fn read_range(
        &self,
        credential: &Credential,
        table_id: &str,
        table_name: &str,
        range: &str,
    ) -> Result<Vec<Vec<String>>, RemoteError> {
        self.get_values(credential, table_id, &absolute_range(table_name, Some(range)))
    }

    fn batch_write(
        &self,
        credential: &Credential,
        table_id: &str,
        table_name: &str,
        writes: &[CellWrite],
    ) -> Result<serde_json::Value, RemoteError> {
        let url = self.url(table_id, &["values:batchUpdate"])?;
        debug!(%url, count = writes.len(), credential = %credential.id(), "batch_write: sending request");

        let data: Vec<serde_json::Value> = writes
            .iter()
            .map(|write| {
                serde_json::json!({
                    "range": absolute_range(table_name, Some(&write.range)),
                    "values": [[write.value]],
                })
            })
            .collect();
        let body = serde_json::json!({
            "valueInputOption": "RAW",
            "data": data,
        });

        let response = self
            .http
            .post(url)
            .bearer_auth(credential.secret())
            .json(&body)
            .send()
            .map_err(transport_error)?;
        check(response)?.json().map_err(transport_error)
    }
}

fn check(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().unwrap_or_default();
    debug!(%status, body_len = text.len(), "check: error response");
    Err(RemoteError::new(Some(status.as_u16()), error_message(&text)))
}

/// Pull the human-readable message out of an API error body
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) if envelope.error.status.is_empty() => envelope.error.message,
        Ok(envelope) => format!("{} ({})", envelope.error.message, envelope.error.status),
        Err(_) => body.trim().to_string(),
    }
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    RemoteError::new(err.status().map(|s| s.as_u16()), err.to_string())
}

fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
