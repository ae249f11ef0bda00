//! Pullwise OpenAI - inference adapters for OpenAI-compatible APIs
//!
//! Provides the embedding provider and language model used by the review
//! pipeline. Any server speaking the `/embeddings` and `/chat/completions`
//! wire format works, including local inference servers.

mod chat;
mod client;
mod embeddings;
mod error;

pub use chat::OpenAiChat;
pub use client::OpenAiClient;
pub use embeddings::OpenAiEmbeddings;
pub use error::{Error, Result};
