//! DAP error types.

use thiserror::Error;

/// Errors from DAP client operations.
#[derive(Debug, Error)]
pub enum DapError {
    /// The transport failed to start or to write.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level communication error.
    #[error("transport error: {0}")]
    Transport(String),

    /// A message could not be interpreted as a DAP protocol message.
    #[error("invalid protocol message: {0}")]
    InvalidMessage(String),

    /// A message could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Session has not been initialized yet.
    #[error("session not initialized")]
    NotInitialized,

    /// Session has already been terminated.
    #[error("session already terminated")]
    Terminated,

    /// The handshake or launch failed; the session is unusable.
    #[error("session failed")]
    Failed,

    /// The session was started twice.
    #[error("session already started")]
    AlreadyStarted,
}
