//! Streaming file transfer with resumption.
//!
//! - Bytes land in `<dest>.partial` and are renamed into place on completion
//! - An existing partial file is resumed with an HTTP Range request
//! - Final size is checked against Content-Length / Content-Range

use std::io;
use std::path::Path;

use fetch_common::paths::partial_path;
use fetch_common::{RetrievalError, RetrievalResult};
use futures::StreamExt;
use reqwest::{header, Client, Response, StatusCode};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use super::{check_status, transport_error};

/// Log progress every 64MB.
const PROGRESS_INTERVAL: u64 = 64 * 1024 * 1024;

/// Authorization attached to a transfer.
#[derive(Clone, Copy)]
pub enum Auth<'a> {
    Anonymous,
    Bearer(&'a str),
}

/// Streams remote files to local paths.
#[derive(Clone)]
pub struct Transfer {
    client: Client,
}

impl Transfer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Download `url` to `dest`, returning the final size in bytes.
    ///
    /// `expected_size` comes from archive metadata when known.
    #[instrument(skip(self, auth), fields(url = %url))]
    pub async fn fetch(
        &self,
        url: &str,
        auth: Auth<'_>,
        dest: &Path,
        expected_size: Option<u64>,
    ) -> RetrievalResult<u64> {
        let temp_path = partial_path(dest);

        let resume_from = match fs::metadata(&temp_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        if let Some(expected) = expected_size {
            if resume_from > 0 && resume_from == expected {
                debug!(path = %temp_path.display(), "Partial file already complete");
                return finish(&temp_path, dest, resume_from).await;
            }
        }

        let mut request = self.client.get(url);
        if let Auth::Bearer(token) = auth {
            request = request.bearer_auth(token);
        }
        if resume_from > 0 {
            info!(resume_from = resume_from, total = ?expected_size, "Resuming download");
            request = request.header(header::RANGE, format!("bytes={}-", resume_from));
        }

        let response = request.send().await.map_err(transport_error)?;

        let (append, total) = match response.status() {
            StatusCode::OK => {
                if resume_from > 0 {
                    warn!("Server ignored range request, restarting download");
                }
                (false, expected_size.or(response.content_length()))
            }
            StatusCode::PARTIAL_CONTENT => {
                debug!("Received partial content, resuming download");
                (true, expected_size.or_else(|| content_range_total(&response)))
            }
            StatusCode::RANGE_NOT_SATISFIABLE => {
                // Stale partial file; start over on the next attempt.
                fs::remove_file(&temp_path).await.ok();
                return Err(RetrievalError::Network(format!(
                    "Range not satisfiable from byte {}",
                    resume_from
                )));
            }
            status => {
                return match check_status(response).await {
                    Err(e) => Err(e),
                    Ok(_) => Err(RetrievalError::Network(format!(
                        "Unexpected HTTP status: {}",
                        status
                    ))),
                };
            }
        };

        let written = stream_to_file(response, &temp_path, append).await?;

        if let Some(total) = total {
            if written != total {
                return Err(RetrievalError::Network(format!(
                    "Download size mismatch: expected {} bytes, got {}",
                    total, written
                )));
            }
        }

        finish(&temp_path, dest, written).await
    }
}

/// Remove a leftover `<dest>.partial`, if any.
///
/// Callers whose source URL changes between attempts use this before
/// [`Transfer::fetch`] so bytes of another file are never resumed.
pub async fn discard_partial(dest: &Path) -> RetrievalResult<()> {
    let temp_path = partial_path(dest);
    match fs::remove_file(&temp_path).await {
        Ok(()) => {
            debug!(path = %temp_path.display(), "Discarded stale partial file");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Stream the response body into `path`, returning the file size afterwards.
async fn stream_to_file(response: Response, path: &Path, append: bool) -> RetrievalResult<u64> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .await?;

    let mut written = if append { file.metadata().await?.len() } else { 0 };
    let mut since_log = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(transport_error)?;
        file.write_all(&chunk).await?;

        written += chunk.len() as u64;
        since_log += chunk.len() as u64;
        if since_log >= PROGRESS_INTERVAL {
            since_log = 0;
            debug!(downloaded = written, "Download progress");
        }
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

/// Move a completed partial file to its final path.
async fn finish(temp_path: &Path, dest: &Path, bytes: u64) -> RetrievalResult<u64> {
    if fs::rename(temp_path, dest).await.is_err() {
        // Cross-device rename; copy then delete.
        fs::copy(temp_path, dest).await?;
        fs::remove_file(temp_path).await?;
    }
    info!(path = %dest.display(), bytes = bytes, "Download completed");
    Ok(bytes)
}

fn content_range_total(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range_total)
}

/// Total length from a `bytes start-end/total` Content-Range value.
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/').and_then(|(_, total)| total.trim().parse().ok())
}
