//! Error types for vector store operations

use thiserror::Error;

/// Store error types
#[derive(Error, Debug)]
pub enum Error {
    /// SQLx database error
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Embedding (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Row or input that violates the store's contract
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for pullwise_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidData(msg) => pullwise_core::Error::InvalidSnippet(msg),
            other => pullwise_core::Error::Store(other.to_string()),
        }
    }
}
