//! Local HTTP backend (Ollama-style generate endpoint).
//!
//! - POST `{endpoint}/api/generate`
//! - Request: `{"model": "...", "prompt": "...", "stream": false, "options": {...}}`
//! - Response: `{"response": "...", "prompt_eval_count": n, "eval_count": m}`

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BackendError, Result};
use crate::traits::GenerateBackend;
use crate::types::{estimate_tokens, GenerateOutput, GenerateParams};

#[derive(Debug, Serialize)]
struct LocalGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    options: LocalOptions,
}

#[derive(Debug, Serialize)]
struct LocalOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct LocalGenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

/// Adapter for a local model host.
pub struct LocalHttpBackend {
    id: String,
    endpoint: String,
    model: String,
    client: Client,
}

impl LocalHttpBackend {
    pub fn new(
        id: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(format!("HTTP client error: {e}")))?;
        Ok(Self {
            id: id.into(),
            endpoint: endpoint.into(),
            model: model.into(),
            client,
        })
    }

    /// Build from a configured cascade member.
    pub fn from_settings(name: &str, settings: &llmc_config::BackendSettings) -> Result<Self> {
        Self::new(
            name,
            settings.endpoint.clone(),
            settings.model.clone(),
            Duration::from_secs(settings.timeout_s),
        )
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl GenerateBackend for LocalHttpBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, params: &GenerateParams) -> Result<GenerateOutput> {
        let request = LocalGenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            system: params.system.as_deref(),
            options: LocalOptions {
                num_predict: params.max_tokens,
                temperature: params.temperature,
            },
        };

        let started = Instant::now();
        let response = self
            .client
            .post(self.generate_url())
            .timeout(params.timeout)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status.as_u16(), &body));
        }

        let body: LocalGenerateResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(format!("local response decode: {e}")))?;
        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(backend = %self.id, latency_ms, "local generate complete");

        if body.response.trim().is_empty() {
            return Err(BackendError::Parse("empty completion".to_string()));
        }

        Ok(GenerateOutput {
            tokens_in: body.prompt_eval_count.unwrap_or_else(|| estimate_tokens(prompt)),
            tokens_out: body
                .eval_count
                .unwrap_or_else(|| estimate_tokens(&body.response)),
            text: body.response,
            latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_generate_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": "{\"summary\": \"ok\"}",
                "prompt_eval_count": 12,
                "eval_count": 7
            })))
            .mount(&server)
            .await;

        let backend =
            LocalHttpBackend::new("local_small", server.uri(), "test-model", Duration::from_secs(5))
                .unwrap();
        let output = backend
            .generate("summarize", &GenerateParams::default())
            .await
            .unwrap();
        assert_eq!(output.tokens_in, 12);
        assert_eq!(output.tokens_out, 7);
        assert!(output.text.contains("summary"));
    }

    #[tokio::test]
    async fn test_empty_completion_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"response": "  "})),
            )
            .mount(&server)
            .await;

        let backend =
            LocalHttpBackend::new("local_small", server.uri(), "test-model", Duration::from_secs(5))
                .unwrap();
        let err = backend
            .generate("summarize", &GenerateParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Parse(_)));
    }

    #[tokio::test]
    async fn test_http_error_categorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let backend =
            LocalHttpBackend::new("local_small", server.uri(), "test-model", Duration::from_secs(5))
                .unwrap();
        let err = backend
            .generate("summarize", &GenerateParams::default())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.reason(), "http_5xx");
    }
}
