//! Upload error types

use thiserror::Error;

use crate::retry::Retryable;

/// Errors surfaced by the upload engine
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP error ({status}): {body}")]
    Http { status: u16, body: String },

    #[error("invalid response from object store: {0}")]
    InvalidResponse(String),

    #[error("upload already in progress: {0}")]
    AlreadyInProgress(String),

    #[error("cannot complete upload, missing parts: {missing:?}")]
    MissingParts { missing: Vec<u32> },

    #[error("upload record disappeared from the ledger: {0}")]
    RecordLost(String),

    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for upload operations
pub type UploadResult<T> = std::result::Result<T, UploadError>;

impl UploadError {
    /// Build an error from a non-success HTTP status
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            status,
            body: body.into(),
        }
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl Retryable for UploadError {
    fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Io(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    fn cancelled() -> Self {
        Self::Cancelled
    }
}
