//! Engine error types

use crate::models::RequestStatus;
use thiserror::Error;

/// Engine error type
#[derive(Error, Debug)]
pub enum SyncError {
    /// Status change not allowed by the transition table. Never sent to the server.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    /// Transient network failure; retried by the next scheduled cycle
    #[error("network failure: {0}")]
    Network(String),

    /// Server rejected the request; message is the server's error payload verbatim
    #[error("{0}")]
    Validation(String),

    /// WebSocket error on the push channel
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Malformed frame on the push channel
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid URL
    #[error("invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Operation attempted on a chat session that was already closed
    #[error("chat session closed")]
    SessionClosed,
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Network(err.to_string())
    }
}

/// Engine result type
pub type Result<T> = std::result::Result<T, SyncError>;
