//! OpenAI-compatible chat-completions backend.
//!
//! Works against OpenAI, Azure OpenAI, and any server speaking the same
//! protocol (including local Ollama in OpenAI mode).
//!
//! - POST `{base_url}/v1/chat/completions`
//! - Request: `{"model": "...", "messages": [...], "max_tokens": n}`
//! - Response: `{"choices": [{"message": {"content": "..."}}], "usage": {...}}`

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BackendError, Result};
use crate::traits::GenerateBackend;
use crate::types::{estimate_tokens, GenerateOutput, GenerateParams};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Adapter for OpenAI-compatible remote providers.
pub struct OpenAiBackend {
    id: String,
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiBackend {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(format!("HTTP client error: {e}")))?;
        Ok(Self {
            id: id.into(),
            base_url: base_url.into(),
            model: model.into(),
            api_key,
            client,
        })
    }

    /// Build from a configured cascade member, resolving the API key
    /// from the environment variable the config names.
    pub fn from_settings(name: &str, settings: &llmc_config::BackendSettings) -> Result<Self> {
        let api_key = settings
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());
        Self::new(
            name,
            settings.endpoint.clone(),
            settings.model.clone(),
            api_key,
            Duration::from_secs(settings.timeout_s),
        )
    }

    fn chat_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }
}

#[async_trait]
impl GenerateBackend for OpenAiBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, params: &GenerateParams) -> Result<GenerateOutput> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = params.system.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });

        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        };

        let mut builder = self
            .client
            .post(self.chat_url())
            .timeout(params.timeout)
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let started = Instant::now();
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status.as_u16(), &body));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(format!("chat response decode: {e}")))?;
        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(backend = %self.id, latency_ms, "chat completion received");

        let text = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(BackendError::Parse("empty completion".to_string()));
        }

        let (tokens_in, tokens_out) = match body.usage {
            Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
            None => (estimate_tokens(prompt), estimate_tokens(&text)),
        };

        Ok(GenerateOutput {
            text,
            tokens_in,
            tokens_out,
            latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chat_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 20, "completion_tokens": 9}
        })
    }

    #[tokio::test]
    async fn test_chat_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("{\"ok\": true}")))
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(
            "remote_cheap",
            server.uri(),
            "gpt-test",
            Some("sk-test".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        let output = backend
            .generate("hello", &GenerateParams::default())
            .await
            .unwrap();
        assert_eq!(output.tokens_in, 20);
        assert_eq!(output.tokens_out, 9);
    }

    #[tokio::test]
    async fn test_url_joining_with_v1_suffix() {
        let backend = OpenAiBackend::new(
            "r",
            "http://host:1234/v1",
            "m",
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(backend.chat_url(), "http://host:1234/v1/chat/completions");

        let backend =
            OpenAiBackend::new("r", "http://host:1234/", "m", None, Duration::from_secs(5))
                .unwrap();
        assert_eq!(backend.chat_url(), "http://host:1234/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_quota_status_maps_to_quota_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(429).set_body_string("You exceeded your current quota"),
            )
            .mount(&server)
            .await;

        let backend =
            OpenAiBackend::new("r", server.uri(), "m", None, Duration::from_secs(5)).unwrap();
        let err = backend
            .generate("hello", &GenerateParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::QuotaExhausted(_)));
    }
}
