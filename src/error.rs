//! Error taxonomy for the feed core
//!
//! Only transports and configuration can fail. Malformed payloads, duplicate
//! deliveries and capacity overflow are policy decisions, not errors, and never
//! show up here.

use thiserror::Error;

/// Failure raised by a transport adapter.
///
/// Transport errors are never fatal: the supervisor turns them into
/// connection-health state and keeps trying.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("response body is not usable: {0}")]
    InvalidBody(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("request timed out after {0}ms")]
    Timeout(u64),
}

impl TransportError {
    /// Stream-level failures terminate the connection, request-level ones
    /// only lose a single poll.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            TransportError::WebSocket(_) | TransportError::Closed(_)
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
