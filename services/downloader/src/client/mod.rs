//! Retrieval clients for the remote archives.

pub mod cds;
pub mod earthdata;
pub mod transfer;

#[cfg(test)]
pub(crate) mod test_server;

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use fetch_common::{DownloadRequest, RetrievalError, RetrievalResult};
use reqwest::{Client, Response};

use crate::config::DownloadSettings;

/// Executes a [`DownloadRequest`], writing the result to `request.destination`.
///
/// Implementations handle authentication and transfer. Errors are classified
/// so the caller can decide whether another attempt makes sense.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, request: &DownloadRequest) -> RetrievalResult<Retrieved>;
}

/// Outcome of a successful retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retrieved {
    /// File or directory written.
    pub path: PathBuf,
    /// Files written by this retrieval.
    pub files: usize,
    /// Files that already existed and were left alone.
    pub skipped_files: usize,
    pub bytes: u64,
}

/// Build the shared HTTP client.
pub fn http_client(settings: &DownloadSettings) -> Result<Client> {
    Client::builder()
        .timeout(settings.request_timeout())
        .connect_timeout(settings.connect_timeout())
        .pool_max_idle_per_host(4)
        .tcp_nodelay(true)
        .user_agent(concat!("geodata-downloader/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")
}

/// Classify a transport-level reqwest error.
pub(crate) fn transport_error(err: reqwest::Error) -> RetrievalError {
    if err.is_timeout() {
        RetrievalError::Timeout
    } else if err.is_builder() {
        RetrievalError::MalformedRequest(err.to_string())
    } else if err.is_decode() {
        RetrievalError::Network(format!("Invalid response body: {}", err))
    } else {
        RetrievalError::Network(err.to_string())
    }
}

/// Pass success responses through, turn anything else into a classified error
/// carrying the response body.
pub(crate) async fn check_status(response: Response) -> RetrievalResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(RetrievalError::from_status(
        status.as_u16(),
        format!("{} ({})", error_detail(&body), url),
    ))
}

/// Pull a readable message out of a JSON error body, or truncate plain text.
fn error_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["detail", "title", "message", "error"] {
            if let Some(text) = value.get(field).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
        if let Some(errors) = value.get("errors").and_then(|v| v.as_array()) {
            let joined: Vec<_> = errors.iter().filter_map(|e| e.as_str()).collect();
            if !joined.is_empty() {
                return joined.join("; ");
            }
        }
    }
    body.chars().take(200).collect()
}
