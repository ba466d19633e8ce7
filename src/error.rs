//! Custom error types for the feed core.
//!
//! This module defines the primary error type, `GridError`, shared by every
//! component of the live-feed core. Using the `thiserror` crate, it provides a
//! centralized way to describe what can go wrong between the external data
//! sources and the scene/audio collaborators.
//!
//! ## Error Hierarchy
//!
//! `GridError` consolidates the following sources:
//!
//! - **`Config`**: Wraps errors from `figment`, typically parse or type errors in the
//!   TOML file or in `SATOSHIS_GRID_` environment overrides.
//! - **`Configuration`**: Semantic problems that pass parsing but are logically wrong
//!   (e.g. non-ascending tier thresholds). Caught by `GridConfig::validate`.
//! - **`Transport`**, **`Http`**, **`WebSocket`**: The transient transport family. A closed
//!   socket or failed fetch is never fatal; it is recovered by reconnect/backoff or by
//!   retaining the last good value.
//! - **`MalformedPayload`**: A single inbound message that could not be decoded. The
//!   message is dropped and the pipeline continues.
//! - **`Io`**: File I/O while loading configuration.
//!
//! Exhausting the reconnect ceiling has no variant: the connector degrades to Demo mode
//! and logs a notice.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type GridResult<T> = std::result::Result<T, GridError>;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Recovery class of an error, following the feed core's failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Socket closed, fetch failed. Recovered by reconnect or stale-value retention.
    TransientTransport,
    /// One message dropped; nothing else changes.
    MalformedPayload,
    /// Only reachable at startup (bad configuration, unreadable file).
    Fatal,
}

impl GridError {
    /// Classify this error for the recovery logic.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            GridError::Transport(_) | GridError::Http(_) | GridError::WebSocket(_) => {
                ErrorClass::TransientTransport
            }
            GridError::MalformedPayload(_) => ErrorClass::MalformedPayload,
            GridError::Config(_) | GridError::Configuration(_) | GridError::Io(_) => {
                ErrorClass::Fatal
            }
        }
    }

    /// Returns true if the condition is recovered automatically.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        self.class() == ErrorClass::TransientTransport
    }
}

impl From<figment::Error> for GridError {
    fn from(value: figment::Error) -> Self {
        GridError::Config(Box::new(value))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for GridError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        GridError::WebSocket(Box::new(value))
    }
}

impl From<serde_json::Error> for GridError {
    fn from(value: serde_json::Error) -> Self {
        GridError::MalformedPayload(value.to_string())
    }
}
