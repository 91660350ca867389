//! OpenAI chat-completion client.
//!
//! A thin wrapper over the `/chat/completions` endpoint. The caller hands
//! over a prompt in any of the accepted shapes (bare string, single message
//! object, or message list) plus a params object that is forwarded verbatim
//! (`model`, `temperature`, `n`, ...); the client returns the text content
//! of the first choice. Transient failures are retried with exponential
//! backoff per [`RetryPolicy`].

use crate::error::{LlmError, Result};
use crate::retry::RetryPolicy;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration for [`OpenAiChatClient`].
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Bearer token. `None` fails at call time, not construction time, so
    /// that hosts without any LLM tasks can run offline.
    pub api_key: Option<String>,
    /// API base URL, without the trailing endpoint path.
    pub base_url: String,
}

impl OpenAiConfig {
    /// Read configuration from `OPENAI_API_KEY` / `OPENAI_BASE_URL`.
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
        }
    }

    /// Explicit configuration, mainly for tests and self-hosted gateways.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            base_url: base_url.into(),
        }
    }
}

/// Chat-completion client with retry/backoff.
#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    config: OpenAiConfig,
    client: Client,
    retry: RetryPolicy,
}

impl OpenAiChatClient {
    /// Create a client with the given configuration and the default retry
    /// policy.
    pub fn new(config: OpenAiConfig) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");

        Self {
            config,
            client,
            retry: RetryPolicy::default(),
        }
    }

    /// Create a client configured from the environment.
    pub fn from_env() -> Self {
        Self::new(OpenAiConfig::from_env())
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Issue a chat completion and return the first choice's text content.
    ///
    /// `messages` may be a bare string, a single message object, or a
    /// message list; `params` must be an object (or null) and is merged
    /// verbatim into the request body. Retryable failures (transport, 429,
    /// 5xx) are retried with backoff; everything else surfaces immediately.
    pub async fn chat(&self, messages: Value, params: Value) -> Result<String> {
        let messages = normalize_messages(messages)?;
        let body = build_body(messages, params)?;

        let mut attempts = 0;
        loop {
            match self.request(&body).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    attempts += 1;
                    if !e.is_retryable() || self.retry.is_exhausted(attempts) {
                        return Err(e);
                    }
                    let delay = self.retry.backoff(attempts - 1);
                    warn!(attempts, error = %e, ?delay, "chat completion failed; retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn request(&self, body: &Value) -> Result<String> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::ApiKeyNotFound("OPENAI_API_KEY".to_string()))?;
        let url = format!("{}/chat/completions", self.config.base_url);

        debug!(%url, "issuing chat completion request");
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 => LlmError::AuthenticationError(text),
                429 => LlmError::RateLimitExceeded(text),
                s if s >= 500 => LlmError::ServiceUnavailable(format!("{status}: {text}")),
                _ => LlmError::ProviderError(format!("{status}: {text}")),
            });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("completion carried no choices".to_string()))
    }
}

/// Coerce the accepted prompt shapes into a message list.
fn normalize_messages(messages: Value) -> Result<Value> {
    match messages {
        Value::String(text) => Ok(json!([{ "role": "user", "content": text }])),
        obj @ Value::Object(_) => Ok(Value::Array(vec![obj])),
        list @ Value::Array(_) => Ok(list),
        other => Err(LlmError::InvalidRequest(format!(
            "prompt must be a string, message object, or message list, got {other}"
        ))),
    }
}

/// Merge the pass-through params into the request body.
fn build_body(messages: Value, params: Value) -> Result<Value> {
    let mut body = Map::new();
    body.insert("messages".to_string(), messages);
    match params {
        Value::Object(extra) => {
            for (key, value) in extra {
                body.insert(key, value);
            }
        }
        Value::Null => {}
        other => {
            return Err(LlmError::InvalidRequest(format!(
                "params must be an object, got {other}"
            )))
        }
    }
    Ok(Value::Object(body))
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_bare_string() {
        let messages = normalize_messages(json!("hello")).unwrap();
        assert_eq!(messages, json!([{ "role": "user", "content": "hello" }]));
    }

    #[test]
    fn test_normalize_single_message() {
        let messages =
            normalize_messages(json!({ "role": "system", "content": "be terse" })).unwrap();
        assert_eq!(
            messages,
            json!([{ "role": "system", "content": "be terse" }])
        );
    }

    #[test]
    fn test_normalize_message_list_passthrough() {
        let list = json!([
            { "role": "system", "content": "be terse" },
            { "role": "user", "content": "hello" }
        ]);
        assert_eq!(normalize_messages(list.clone()).unwrap(), list);
    }

    #[test]
    fn test_normalize_rejects_numbers() {
        assert!(normalize_messages(json!(42)).is_err());
    }

    #[test]
    fn test_body_merges_params() {
        let body = build_body(
            json!([{ "role": "user", "content": "hi" }]),
            json!({ "model": "gpt-4o-mini", "temperature": 1 }),
        )
        .unwrap();
        assert_eq!(body["model"], json!("gpt-4o-mini"));
        assert_eq!(body["temperature"], json!(1));
        assert!(body["messages"].is_array());
    }

    #[test]
    fn test_body_rejects_non_object_params() {
        assert!(build_body(json!([]), json!([1, 2])).is_err());
        assert!(build_body(json!([]), Value::Null).is_ok());
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_at_call_time() {
        let client = OpenAiChatClient::new(OpenAiConfig {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
        });

        let err = client
            .chat(json!("hi"), json!({ "model": "gpt-4o-mini" }))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ApiKeyNotFound(_)));
    }
}
