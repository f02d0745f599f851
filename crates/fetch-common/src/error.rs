//! Error types for retrieval operations.

use thiserror::Error;

/// Result type alias using RetrievalError.
pub type RetrievalResult<T> = Result<T, RetrievalError>;

/// Why a single download request could not be completed.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Data not available: {0}")]
    DataNotAvailable(String),

    #[error("Remote job failed: {0}")]
    RemoteJobFailed(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl RetrievalError {
    /// Classify a non-success HTTP status returned by an archive.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = format!("HTTP {}: {}", status, message.into());
        match status {
            401 | 403 => RetrievalError::Authentication(message),
            400 | 405 | 413 | 422 => RetrievalError::MalformedRequest(message),
            404 | 410 => RetrievalError::DataNotAvailable(message),
            408 | 504 => RetrievalError::Timeout,
            _ => RetrievalError::Network(message),
        }
    }

    /// Short label used in logs and run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            RetrievalError::Authentication(_) => "authentication",
            RetrievalError::Network(_) => "network",
            RetrievalError::Timeout => "timeout",
            RetrievalError::MalformedRequest(_) => "malformed_request",
            RetrievalError::DataNotAvailable(_) => "data_not_available",
            RetrievalError::RemoteJobFailed(_) => "remote_job_failed",
            RetrievalError::Io(_) => "io",
        }
    }

    /// Transient failures that may succeed when tried again.
    pub fn is_transient(&self) -> bool {
        matches!(self, RetrievalError::Network(_) | RetrievalError::Timeout)
    }
}

impl From<std::io::Error> for RetrievalError {
    fn from(err: std::io::Error) -> Self {
        RetrievalError::Io(err.to_string())
    }
}
