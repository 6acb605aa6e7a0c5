//! Error taxonomy for the polling and publishing paths.
//!
//! Poll-path variants (`Network`, `Status`, `Parse`) are logged and degrade to
//! "no update this cycle". Admin-path variants are surfaced to the user as
//! toasts by the publisher.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Request rejected, timed out, or the body could not be read.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Configured endpoint is not a valid absolute URL.
    #[error("invalid URL {0:?}")]
    InvalidUrl(String),

    /// Remote answered outside the 2xx range.
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// Body was not a valid snapshot document.
    #[error("malformed snapshot JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Admin action attempted without an administrator session.
    #[error("administrator login required")]
    Unauthorized,

    /// Admin read of the current document failed; nothing was merged.
    #[error("could not read current data: {0}")]
    RemoteRead(String),

    /// Merged document could not be persisted to the blob store.
    #[error("remote write failed: {0}")]
    RemoteWrite(String),

    /// Form submission missing a required field.
    #[error("invalid form: {0}")]
    InvalidForm(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide `Result` alias defaulting to `SyncError`.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;
