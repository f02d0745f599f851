//! Drives a job's requests through a retriever with per-request isolation.
//!
//! A failed request is logged with its destination path and recorded in the
//! run summary; the remaining requests always run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fetch_common::paths;
use fetch_common::{DownloadRequest, RetrievalError};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::client::{Retrieved, Retriever};
use crate::config::DownloadSettings;

/// Extra attempts for transient failures, with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub max_concurrent: usize,
    pub retry: RetryPolicy,
    pub overwrite: bool,
}

impl From<&DownloadSettings> for RunOptions {
    fn from(settings: &DownloadSettings) -> Self {
        Self {
            max_concurrent: settings.max_concurrent.max(1),
            retry: RetryPolicy {
                max_retries: settings.max_retries,
                initial_delay: settings.initial_retry_delay(),
                max_delay: settings.max_retry_delay(),
            },
            overwrite: settings.overwrite,
        }
    }
}

/// A request that could not be completed.
#[derive(Debug, Clone, Serialize)]
pub struct FailedDownload {
    pub destination: PathBuf,
    pub request: String,
    pub kind: String,
    pub message: String,
    pub attempts: u32,
}

enum Outcome {
    Downloaded(Retrieved),
    Skipped,
    Failed(FailedDownload),
}

/// Totals for one job run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub job: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub requests: usize,
    pub downloaded: usize,
    /// Requests whose output already existed.
    pub skipped: usize,
    pub files: usize,
    /// Files inside a request (granules) that already existed.
    pub skipped_files: usize,
    pub bytes: u64,
    pub failures: Vec<FailedDownload>,
}

impl RunSummary {
    fn new(job: &str) -> Self {
        let now = Utc::now();
        Self {
            job: job.to_string(),
            started_at: now,
            finished_at: now,
            requests: 0,
            downloaded: 0,
            skipped: 0,
            files: 0,
            skipped_files: 0,
            bytes: 0,
            failures: Vec::new(),
        }
    }

    fn record(&mut self, outcome: Outcome) {
        self.requests += 1;
        match outcome {
            Outcome::Downloaded(retrieved) => {
                self.downloaded += 1;
                self.files += retrieved.files;
                self.skipped_files += retrieved.skipped_files;
                self.bytes += retrieved.bytes;
            }
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed(failure) => self.failures.push(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Write the summary as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        paths::prepare_file(path)?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write run report: {}", path.display()))
    }
}

/// Runs requests against one retriever.
pub struct Runner<R: Retriever + ?Sized> {
    retriever: Arc<R>,
    options: RunOptions,
}

impl<R: Retriever + ?Sized> Runner<R> {
    pub fn new(retriever: Arc<R>, options: RunOptions) -> Self {
        Self { retriever, options }
    }

    /// Process every request, at most `max_concurrent` at a time.
    #[instrument(skip(self, requests))]
    pub async fn run<I>(&self, job: &str, requests: I) -> RunSummary
    where
        I: IntoIterator<Item = DownloadRequest>,
    {
        let mut summary = RunSummary::new(job);

        let outcomes = stream::iter(requests)
            .map(|request| self.process(request))
            .buffer_unordered(self.options.max_concurrent.max(1))
            .collect::<Vec<_>>()
            .await;

        for outcome in outcomes {
            summary.record(outcome);
        }
        summary.finished_at = Utc::now();

        info!(
            job = %job,
            requests = summary.requests,
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            skipped_files = summary.skipped_files,
            failed = summary.failures.len(),
            bytes = summary.bytes,
            "Download run complete"
        );
        summary
    }

    async fn process(&self, request: DownloadRequest) -> Outcome {
        let path = request.destination.clone();
        info!(path = %path.display(), request = %request.label(), "Requesting");

        if !request.format.is_directory() && !self.options.overwrite && path.exists() {
            info!(path = %path.display(), "File already exists, skipping download");
            return Outcome::Skipped;
        }

        let prepared = if request.format.is_directory() {
            paths::prepare_dir(&path)
        } else {
            paths::prepare_file(&path)
        };
        if let Err(e) = prepared {
            return self.failure(&request, RetrievalError::from(e), 0);
        }

        let retry = self.options.retry;
        let mut attempt = 0;
        let mut delay = retry.initial_delay;

        loop {
            attempt += 1;
            match self.retriever.retrieve(&request).await {
                Ok(retrieved) => {
                    info!(
                        path = %retrieved.path.display(),
                        files = retrieved.files,
                        skipped_files = retrieved.skipped_files,
                        bytes = retrieved.bytes,
                        "Request complete"
                    );
                    return Outcome::Downloaded(retrieved);
                }
                Err(e) if e.is_transient() && attempt <= retry.max_retries => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        attempt = attempt,
                        max_retries = retry.max_retries,
                        delay_secs = delay.as_secs(),
                        "Download failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, retry.max_delay);
                }
                Err(e) => return self.failure(&request, e, attempt),
            }
        }
    }

    fn failure(&self, request: &DownloadRequest, err: RetrievalError, attempts: u32) -> Outcome {
        error!(
            path = %request.destination.display(),
            kind = err.kind(),
            error = %err,
            "Download failure"
        );
        Outcome::Failed(FailedDownload {
            destination: request.destination.clone(),
            request: request.label(),
            kind: err.kind().to_string(),
            message: err.to_string(),
            attempts,
        })
    }
}
