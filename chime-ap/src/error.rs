//! Error types for chime-ap
//!
//! Gate decisions are not errors; they travel as values. These variants
//! cover configuration, persistence, sound resolution and playback.

use thiserror::Error;

/// Main error type for chime-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP server or client errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Sound reference could not be resolved to something playable
    #[error("Sound resolution error: {0}")]
    Resolve(String),

    /// External player failed
    #[error("Playback error: {0}")]
    Playback(String),

    /// Queue management errors
    #[error("Queue error: {0}")]
    Queue(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from the shared library
    #[error(transparent)]
    Common(#[from] chime_common::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err.to_string())
    }
}

/// Convenience Result type using chime-ap Error
pub type Result<T> = std::result::Result<T, Error>;
