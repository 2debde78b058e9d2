use thiserror::Error;

use crate::persistence::StoreError;

/// Errors raised while handling a client event on the realtime channel.
///
/// The protocol boundary maps these to acknowledgment statuses: a missing
/// portfolio on join becomes `noportfolio`, everything else collapses to the
/// opaque `error` status so storage internals never leak to the webview.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Portfolio not found: {0}")]
    PortfolioNotFound(i64),

    #[error("Connection has not joined a portfolio")]
    NotJoined,

    #[error("Invalid event payload: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Messenger API error: {0}")]
    Messenger(#[from] MessengerError),
}

/// Errors from the messaging platform collaborators (Graph API and Send API)
#[derive(Debug, Error)]
pub enum MessengerError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for MessengerError {
    fn from(e: reqwest::Error) -> Self {
        MessengerError::Request(e.to_string())
    }
}
