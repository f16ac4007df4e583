//! Error types for the session layer and the tool collaborator.

use crate::session::SessionId;

/// Result type for session registry operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors raised by the session registry.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The id is unknown, or belongs to a session that has already closed.
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    /// No further sessions can be created.
    #[error("Session capacity exhausted: {0}")]
    ResourceExhausted(String),

    /// A push stream is already attached to this session.
    #[error("A stream is already attached to session {0}")]
    StreamAttached(SessionId),

    /// The session's transport could not be wired up.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors raised when writing to a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The stream has ended; nothing more can be written.
    #[error("Transport closed")]
    Closed,

    /// `bind` was called on a transport that already owns a stream.
    #[error("Transport is already bound to a stream")]
    AlreadyBound,

    /// `send` was called before any stream was bound.
    #[error("Transport is not bound to a stream")]
    Unbound,

    /// The outbound buffer is full because nobody is draining the stream.
    #[error("Transport buffer is full")]
    Backpressure,

    /// The message could not be encoded as JSON.
    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned by the tool collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// No tool is registered under this name.
    #[error("Unknown tool: {0}")]
    NotFound(String),

    /// The arguments do not match the tool's input schema.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran and failed.
    #[error("{0}")]
    Execution(#[from] anyhow::Error),
}
