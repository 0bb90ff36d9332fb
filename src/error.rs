//! Error taxonomy for the playlist engine and its store.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlendError {
    /// A catalog client call failed (network, expired credential, rate limit).
    #[error("catalog request `{operation}` failed: {message}")]
    UpstreamFetch { operation: &'static str, message: String },

    #[error("SQLite error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("playlist `{0}` not found")]
    NotFound(String),

    #[error("playlist `{id}` is {actual}, expected {expected}")]
    InvalidState {
        id: String,
        expected: &'static str,
        actual: String,
    },

    /// Another release or refresh is already running for this playlist.
    #[error("playlist `{0}` is already being generated")]
    Busy(String),

    /// The stored record changed between read and write.
    #[error("playlist `{0}` was modified concurrently")]
    Conflict(String),

    #[error("playlist `{0}` has no participant with a catalog credential")]
    NoHost(String),

    #[error("invalid input: {0}")]
    Validation(String),
}

impl BlendError {
    pub fn upstream(operation: &'static str, message: impl ToString) -> Self {
        Self::UpstreamFetch {
            operation,
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BlendError>;
