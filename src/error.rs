// Error types for refhooks.
// Covers remote read failures, snapshot shape errors, and configuration errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Read denied for {0}")]
    Denied(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Snapshot is not a key/value mapping: {0}")]
    UnexpectedShape(String),

    #[error("Missing {0} environment variable")]
    MissingConfig(&'static str),

    #[error("Invalid database URL: {0}")]
    InvalidUrl(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, FetchError>;
