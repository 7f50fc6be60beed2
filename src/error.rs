//! Error types for the translator core

use thiserror::Error;

use crate::session::SessionState;

/// Result type alias for translator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the translator core
#[derive(Debug, Error)]
pub enum Error {
    /// No microphone, or permission to use it was denied
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Handshake or transport failure on the realtime session
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed inbound audio payload
    #[error("decode error: {0}")]
    Decode(String),

    /// One of the joint text-path requests failed
    #[error("translation error: {0}")]
    Translation(String),

    /// The session task cannot serve the request until an open settles
    #[error("session busy: {0}")]
    Busy(String),

    /// Persistence collaborator failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Attempted a session state transition that would skip a state
    #[error("invalid session transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
    /// Whether this error belongs to the locally-recoverable class
    ///
    /// Decode failures drop one chunk; everything else aborts the operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}
