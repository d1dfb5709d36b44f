//! Error taxonomy for the mirror.
//!
//! Page-level failures are isolated to the page (the fetcher returns a
//! failed-page marker and the batch continues); source-level failures
//! propagate and abort the update run.

use thiserror::Error;

/// Errors produced by the NVD API client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Payload did not match the expected shape (unknown `format` tag or
    /// missing item list). Retried with backoff before being surfaced.
    #[error("response payload does not match the expected data shape")]
    DataShape,

    /// A page could not be fetched after exhausting retries, or the server
    /// answered with a non-2xx status. Consumed by the caller as a marker,
    /// the batch continues without the page.
    #[error("retrieval failed for url: {url}")]
    RetrievalFailed { url: String },

    /// The initial total-count probe failed after all transport retries.
    #[error("max retries exceeded while querying the result count")]
    MaxRetriesExceeded,

    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Errors produced by the update orchestrator and storage layer.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// An unknown source name was requested. Fatal: aborts the whole run.
    #[error("update source not found: {0}")]
    SourceNotFound(String),

    /// The on-disk schema does not match what this binary writes. Fatal
    /// at startup, surfaced before any write.
    #[error("schema version mismatch: store has {found}, this build expects {supported}")]
    SchemaVersion { found: u32, supported: u32 },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("record encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("feed error: {0}")]
    Feed(String),
}
