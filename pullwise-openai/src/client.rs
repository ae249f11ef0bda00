//! Shared HTTP plumbing for OpenAI-compatible endpoints

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::{Error, Result};

/// Per-request timeout; the pipeline's event deadline bounds the total
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// HTTP client bound to one API base URL
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    /// Create a client for `base_url` (e.g. `https://api.openai.com/v1`)
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("pullwise")
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Fail early when the endpoint requires a key and none is configured
    pub fn require_api_key(self) -> Result<Self> {
        if self.api_key.is_none() {
            return Err(Error::Auth(
                "API key not found. Set PULLWISE_LLM_API_KEY or OPENAI_API_KEY, \
                 or add [llm] api_key to ~/.config/pullwise/secrets.toml"
                    .to_string(),
            ));
        }
        Ok(self)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL of an API path
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POST a JSON body and decode a JSON response
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        debug!(url = %url, "POST");

        let mut request = self.http.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response".to_string());
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Parse(format!("Failed to parse response from {}: {}", url, e)))
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let client = OpenAiClient::new("https://api.example.com/v1/", None).unwrap();
        assert_eq!(client.base_url(), "https://api.example.com/v1");
        assert_eq!(client.url("/embeddings"), "https://api.example.com/v1/embeddings");
        assert_eq!(client.url("chat/completions"), "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn test_require_api_key() {
        let missing = OpenAiClient::new("http://localhost", None).unwrap();
        assert!(matches!(missing.require_api_key(), Err(Error::Auth(_))));

        let present = OpenAiClient::new("http://localhost", Some("sk".to_string())).unwrap();
        assert!(present.require_api_key().is_ok());
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = OpenAiClient::new("http://localhost", Some("sk-secret".to_string())).unwrap();
        let debug = format!("{:?}", client);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let (base_url, server) =
            test_server::respond_once(429, r#"{"error":{"message":"slow down"}}"#).await;
        let client = OpenAiClient::new(base_url, None).unwrap();

        let err = client
            .post_json::<_, serde_json::Value>("embeddings", &serde_json::json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Api { status: 429, ref message } if message.contains("slow down")));
        server.await.unwrap();
    }
}
