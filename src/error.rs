//! Error types for the relay
//!
//! Defines transport-level errors, per-session send errors and
//! configuration errors. Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Relay-level errors
///
/// Everything except a failed bind is confined to the connection
/// that produced it.
#[derive(Debug, Error)]
pub enum RelayError {
    /// IO error (fatal for the connection)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Line framing error (line too long, invalid UTF-8)
    #[error("Line codec error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    /// Listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Outbound line send errors
///
/// Occurs when a line cannot be queued for a session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The session's writer has gone away
    #[error("Session closed")]
    Closed,

    /// The session's outbound queue is full (slow reader)
    #[error("Outbound queue full")]
    QueueFull,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    /// Config file is not valid JSON for `ServerConfig`
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Command line not understood
    #[error("{0}")]
    Usage(String),

    /// A value is out of range
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}
