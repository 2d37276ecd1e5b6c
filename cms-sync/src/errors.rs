use reqwest::StatusCode;
use thiserror::Error;

/// Failures talking to the content source or the record store.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("HTTP client error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("upstream returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("upstream unavailable after retries, last status {0}")]
    RetriesExceeded(StatusCode),
}

/// Failures that abort a whole sync run.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("content source fetch failed: {0}")]
    ContentFetch(#[source] UpstreamError),

    #[error("record store fetch failed: {0}")]
    RecordFetch(#[source] UpstreamError),

    #[error("sync task ended without publishing a result")]
    Abandoned,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Invalid webhook signature")]
    Invalid,

    #[error("webhook signature present but no secret is configured")]
    NoSecretConfigured,
}
