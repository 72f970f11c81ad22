//! Common error types for Manthan

use thiserror::Error;

/// Common result type for Manthan operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Manthan services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding of a stored column failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation refused because of the resource's current state
    /// (e.g. a run requested for an ingestion that is already running)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for SQLite lock contention, the only database error worth retrying
    pub fn is_database_locked(&self) -> bool {
        match self {
            Error::Database(err) => err.to_string().contains("database is locked"),
            _ => false,
        }
    }
}
