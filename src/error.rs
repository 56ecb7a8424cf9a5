//! Error types shared across the client.

use thiserror::Error;

/// Failure talking to the sandbox backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend returned {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid backend url: {0}")]
    BadUrl(#[from] url::ParseError),
}

/// Failure reading or writing the persisted session record.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record io: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),
}
