//! Error types for taskhost.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Another live lease holds the name. Expected under contention; the
    /// caller decides whether to poll again.
    #[error("could not acquire lock '{name}': held by another owner")]
    LockNotAcquired { name: String },

    /// A renew or release affected zero rows. The caller no longer owns the
    /// lease and must stop privileged work immediately.
    #[error("lease on '{name}' is no longer held")]
    LeaseLost { name: String },

    /// No handler registered for a message's declared type. A configuration
    /// error, not a runtime queue error.
    #[error("no handler registered for job type '{0}'")]
    UnknownJobType(String),

    #[error("handler for job type '{0}' is already registered")]
    HandlerAlreadyRegistered(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("payload codec error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
