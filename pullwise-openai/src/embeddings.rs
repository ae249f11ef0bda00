//! `/embeddings` adapter

use async_trait::async_trait;
use pullwise_core::models::Embedding;
use pullwise_core::providers::EmbeddingProvider;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, OpenAiClient, Result};

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Embedding provider for OpenAI-compatible APIs
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddings {
    client: OpenAiClient,
}

impl OpenAiEmbeddings {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }

    /// Embed `texts`, returning vectors in request order
    pub async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Embedding>> {
        let response: EmbeddingResponse = self
            .client
            .post_json("embeddings", &EmbeddingRequest { model, input: texts })
            .await?;
        debug!(model, requested = texts.len(), returned = response.data.len(), "Embeddings received");
        order_by_index(response.data)
    }
}

/// Sort by the `index` field when the server provides it
fn order_by_index(mut data: Vec<EmbeddingData>) -> Result<Vec<Embedding>> {
    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
        for (expected, d) in data.iter().enumerate() {
            if d.index != Some(expected) {
                return Err(Error::Parse(format!(
                    "Embedding indices are not contiguous: expected {}, got {:?}",
                    expected, d.index
                )));
            }
        }
    }
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    async fn create_embeddings(
        &self,
        model: &str,
        texts: &[String],
    ) -> pullwise_core::Result<Vec<Embedding>> {
        self.embed(model, texts)
            .await
            .map_err(Error::into_embedding_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_server;

    #[test]
    fn test_request_shape() {
        let input = vec!["func A() {}".to_string()];
        let json = serde_json::to_value(EmbeddingRequest {
            model: "text-embedding-3-small",
            input: &input,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"model": "text-embedding-3-small", "input": ["func A() {}"]})
        );
    }

    #[test]
    fn test_out_of_order_response_is_sorted() {
        let response: EmbeddingResponse = serde_json::from_str(
            r#"{"data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]}"#,
        )
        .unwrap();
        let vectors = order_by_index(response.data).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_gapped_indices_are_rejected() {
        let response: EmbeddingResponse = serde_json::from_str(
            r#"{"data": [{"index": 0, "embedding": [1.0]}, {"index": 2, "embedding": [2.0]}]}"#,
        )
        .unwrap();
        assert!(matches!(order_by_index(response.data), Err(Error::Parse(_))));
    }

    #[tokio::test]
    async fn test_embeddings_over_http() {
        let (base_url, server) = test_server::respond_once(
            200,
            r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.25,0.5]}]}"#,
        )
        .await;
        let client = OpenAiClient::new(base_url, Some("sk-test".to_string())).unwrap();
        let provider = OpenAiEmbeddings::new(client);

        let vectors = provider
            .create_embeddings("text-embedding-3-small", &["hello".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![0.25, 0.5]]);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1/embeddings"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer sk-test"));
        assert!(request.contains(r#""input":["hello"]"#));
    }

    #[tokio::test]
    async fn test_server_error_maps_to_embedding_error() {
        let (base_url, server) = test_server::respond_once(503, r#"{"error":"down"}"#).await;
        let provider = OpenAiEmbeddings::new(OpenAiClient::new(base_url, None).unwrap());

        let err = provider
            .create_embeddings("m", &["x".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, pullwise_core::Error::Embedding(_)));
        assert!(err.is_retryable());
        server.await.unwrap();
    }
}
