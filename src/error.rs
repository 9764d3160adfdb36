//! Error types for spindle-core.

use thiserror::Error;

/// Result type alias using spindle-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a generation session.
#[derive(Error, Debug)]
pub enum Error {
    /// Event store read/write failed
    #[error("Event store error: {0}")]
    Storage(String),

    /// Event log or snapshot could not be decoded; no recovery is defined
    #[error("Event store corrupted: {0}")]
    Corrupt(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// LLM adapter error
    #[error("LLM error: {provider} - {message}")]
    Llm { provider: String, message: String },

    /// Any other adapter failure during effect execution
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// Filesystem error while executing a file effect
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout during operation
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// A file effect tried to reach outside the session work directory
    #[error("Path escapes work directory: {path}")]
    PathEscape { path: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an event store error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a corruption error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt(message.into())
    }

    /// Create an LLM adapter error.
    pub fn llm(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Llm {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create an adapter error.
    pub fn adapter(message: impl Into<String>) -> Self {
        Self::Adapter(message.into())
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// True when the orchestrator may continue after converting this error
    /// into an `ErrorOccurred` event.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Corrupt(_))
    }
}
