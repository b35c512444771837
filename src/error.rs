//! Error types for txgate.

use thiserror::Error;

/// Main error type for txgate operations.
///
/// A rejected admission is not an error: `check_admission` returns
/// `Ok(false)` for that. These variants cover misconfiguration and
/// malformed caller input.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// An empty identity key was supplied
    #[error("Invalid key: key must not be empty")]
    InvalidKey,

    /// A timestamp could not be interpreted
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// A timestamp older than the key's last-seen timestamp, under the
    /// reject policy
    #[error("Out-of-order timestamp {timestamp} for key '{key}' (last seen {last_seen})")]
    OutOfOrder {
        key: String,
        timestamp: i64,
        last_seen: i64,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for txgate operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
