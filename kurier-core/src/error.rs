//! Error types for kurier-core

use thiserror::Error;

/// Main error type for the kurier-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport-level delivery failure (network, timeout, non-2xx status)
    #[error("transport error: {0}")]
    Transport(String),

    /// Durable storage failure below the backend conversion level
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type alias for kurier-core
pub type Result<T> = std::result::Result<T, Error>;
