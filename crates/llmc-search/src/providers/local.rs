//! Local model-host embedding provider (Ollama-style).
//!
//! - POST `{endpoint}/api/embed`
//! - Request: `{"model": "...", "input": ["text1", ...]}`
//! - Response: `{"embeddings": [[...], ...]}`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{check_dims, EmbeddingProvider};
use crate::error::{Result, SearchError};

#[derive(Debug, Serialize)]
struct LocalEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct LocalEmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

/// Adapter for a local embedding host.
pub struct LocalEmbeddingProvider {
    client: Client,
    endpoint: String,
    model: String,
    dim: usize,
    provider_id: String,
}

impl LocalEmbeddingProvider {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, dim: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SearchError::ProviderUnavailable(format!("HTTP client error: {e}")))?;
        let model = model.into();
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            provider_id: format!("local:{model}"),
            model,
            dim,
        })
    }

    pub fn from_profile(profile: &llmc_config::ProfileConfig) -> Result<Self> {
        Self::new(profile.endpoint.clone(), profile.model.clone(), profile.dim)
    }

    fn embed_url(&self) -> String {
        format!("{}/api/embed", self.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.embed_url())
            .json(&LocalEmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| SearchError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::ProviderUnavailable(format!("HTTP {status}")));
        }

        let body: LocalEmbedResponse = response
            .json()
            .await
            .map_err(|e| SearchError::ProviderUnavailable(format!("decode error: {e}")))?;
        if body.embeddings.len() != texts.len() {
            return Err(SearchError::ProviderUnavailable(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.embeddings.len()
            )));
        }
        check_dims(self.dim, &body.embeddings)?;
        Ok(body.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_local_embed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1, 0.2], [0.3, 0.4]]
            })))
            .mount(&server)
            .await;

        let provider = LocalEmbeddingProvider::new(server.uri(), "nomic", 2).unwrap();
        let vectors = provider
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
    }

    #[tokio::test]
    async fn test_count_mismatch_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1, 0.2]]
            })))
            .mount(&server)
            .await;

        let provider = LocalEmbeddingProvider::new(server.uri(), "nomic", 2).unwrap();
        let err = provider
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::ProviderUnavailable(_)));
    }
}
