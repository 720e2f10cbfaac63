//! Completion provider
//!
//! A single chat-completion call per question. Failures surface as
//! [`ExternalService::Completion`] errors and are never retried here.

use crate::config::CompletionConfig;
use crate::error::{Error, ExternalService, Result};
use crate::meta::MessageRole;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// One turn of the prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Provider output
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// Total tokens as reported by the provider, when it reports usage
    pub tokens_used: Option<u32>,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, system_prompt: &str, messages: &[ChatMessage]) -> Result<Completion>;

    fn model_name(&self) -> &str;
}

/// Create the completion client described by configuration
pub fn create_completion_provider(config: &CompletionConfig) -> Result<Arc<dyn CompletionProvider>> {
    Ok(Arc::new(HttpCompletionClient::new(config)?))
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u32,
}

/// Client for an OpenAI-compatible `/v1/chat/completions` endpoint
pub struct HttpCompletionClient {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl HttpCompletionClient {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.url)?
            .join("/v1/chat/completions")
            .map_err(|e| Error::Config(format!("Invalid completion URL: {}", e)))?;

        Ok(Self {
            client: Client::builder().timeout(config.timeout()).build()?,
            endpoint,
            api_key: config.api_key(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl CompletionProvider for HttpCompletionClient {
    async fn complete(&self, system_prompt: &str, messages: &[ChatMessage]) -> Result<Completion> {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        wire.push(WireMessage {
            role: MessageRole::System.as_str(),
            content: system_prompt,
        });
        wire.extend(messages.iter().map(|m| WireMessage {
            role: m.role.as_str(),
            content: &m.content,
        }));

        let body = ChatRequest {
            model: &self.model,
            messages: wire,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        debug!(model = %self.model, turns = messages.len(), "Requesting completion");

        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::external(ExternalService::Completion, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::external(
                ExternalService::Completion,
                format!("provider returned {}: {}", status, truncate(&detail, 200)),
            ));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            Error::external(
                ExternalService::Completion,
                format!("unexpected response body: {}", e),
            )
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                Error::external(ExternalService::Completion, "provider returned no choices")
            })?;

        Ok(Completion {
            text,
            tokens_used: parsed.usage.map(|u| u.total_tokens),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str) -> CompletionConfig {
        CompletionConfig {
            url: url.to_string(),
            model: "test-chat".to_string(),
            api_key_env: "DOCCHAT_TEST_UNSET_KEY".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_complete_sends_system_prompt_first() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({
                "model": "test-chat",
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hi"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "hello"}}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpCompletionClient::new(&config(&server.uri())).unwrap();
        let completion = client
            .complete("be brief", &[ChatMessage::user("hi")])
            .await
            .unwrap();

        assert_eq!(completion.text, "hello");
        assert_eq!(completion.tokens_used, Some(12));
    }

    #[tokio::test]
    async fn test_missing_usage_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "ok"}}]
            })))
            .mount(&server)
            .await;

        let client = HttpCompletionClient::new(&config(&server.uri())).unwrap();
        let completion = client.complete("sys", &[]).await.unwrap();
        assert_eq!(completion.tokens_used, None);
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpCompletionClient::new(&config(&server.uri())).unwrap();
        let err = client
            .complete("sys", &[ChatMessage::user("q")])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ExternalService {
                service: ExternalService::Completion,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_empty_choices_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let client = HttpCompletionClient::new(&config(&server.uri())).unwrap();
        assert!(client.complete("sys", &[]).await.is_err());
    }
}
