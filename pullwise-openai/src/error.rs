//! Error types for inference API calls

use thiserror::Error;

/// Result type for inference API calls
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur talking to an OpenAI-compatible endpoint
#[derive(Error, Debug)]
pub enum Error {
    /// Transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response
    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Missing or invalid credentials
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Response body did not match the expected shape
    #[error("Parse error: {0}")]
    Parse(String),
}

impl Error {
    /// Convert to the core error for an embedding call
    pub fn into_embedding_error(self) -> pullwise_core::Error {
        pullwise_core::Error::Embedding(self.to_string())
    }

    /// Convert to the core error for a completion call
    pub fn into_llm_error(self) -> pullwise_core::Error {
        pullwise_core::Error::Llm(self.to_string())
    }
}
