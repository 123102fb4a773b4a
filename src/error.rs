//! Error types for the contents index service.

use apt_contents::ContentsError;
use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur while refreshing or querying the index.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Retrieving a feed failed (transport, HTTP status, or a read failing mid-stream).
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// The feed was retrieved but judged unusable.
    #[error("Feed rejected: {0}")]
    Feed(ContentsError),

    /// The persistent store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A background task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IndexError {
    /// Whether the error leaves the local store in a state that further
    /// refreshes cannot be trusted to fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

impl From<ContentsError> for IndexError {
    fn from(e: ContentsError) -> Self {
        match e {
            ContentsError::Io(e) => IndexError::Fetch(e.to_string()),
            e => IndexError::Feed(e),
        }
    }
}

impl From<reqwest::Error> for IndexError {
    fn from(e: reqwest::Error) -> Self {
        IndexError::Fetch(e.to_string())
    }
}

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;
