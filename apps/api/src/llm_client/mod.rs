/// LLM Client: the single point of entry for all completion calls in HireFlow.
///
/// ARCHITECTURAL RULE: No other module may call the completion API directly.
/// All LLM interactions MUST go through the `CompletionProvider` seam.
///
/// Backed by a local Ollama server; the response is constrained to the JSON
/// schema supplied with each request.
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::retry::{AttemptFailure, RetryPolicy};

pub mod prompts;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("LLM unavailable after {attempts} attempt(s): {reason}")]
    Unavailable { attempts: u32, reason: String },
}

impl LlmError {
    /// 429, 5xx and transport failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(_) | LlmError::Unavailable { .. } => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            LlmError::Parse(_) | LlmError::EmptyContent => false,
        }
    }
}

pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub prompt: &'a str,
    pub response_schema: &'a Value,
}

/// Text completion constrained to a JSON schema. The returned text is untrusted.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    format: &'a Value,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatResponseMessage>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

/// The single LLM client used by the extraction pipeline.
/// Wraps the Ollama chat API with retry logic and schema-constrained output.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    base_url: String,
    model: String,
    retry: RetryPolicy,
}

impl LlmClient {
    pub fn new(base_url: &str, model: &str, retry: RetryPolicy) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder().timeout(retry.attempt_timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            retry,
        })
    }

    async fn call_once(&self, request: &CompletionRequest<'_>) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.system,
                },
                ChatMessage {
                    role: "user",
                    content: request.prompt,
                },
            ],
            stream: false,
            format: request.response_schema,
            options: ChatOptions { temperature: 0.0 },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<OllamaError>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let chat: ChatResponse = serde_json::from_str(&response.text().await?)?;

        debug!(
            "LLM call succeeded: model={}, prompt_tokens={:?}, output_tokens={:?}",
            self.model, chat.prompt_eval_count, chat.eval_count
        );

        match chat.message {
            Some(m) if !m.content.trim().is_empty() => Ok(m.content),
            _ => Err(LlmError::EmptyContent),
        }
    }
}

#[async_trait]
impl CompletionProvider for LlmClient {
    /// Retries on 429, 5xx and transport errors with capped exponential backoff.
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, LlmError> {
        self.retry
            .run("LLM call", || self.call_once(&request), LlmError::is_transient)
            .await
            .map_err(|exhausted| match exhausted.last {
                AttemptFailure::Error(e) if !exhausted.retryable => e,
                last => LlmError::Unavailable {
                    attempts: exhausted.attempts,
                    reason: last.to_string(),
                },
            })
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let input = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_without_tag() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        let input = "{\"key\": \"value\"}";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_rate_limits_and_server_errors_are_transient() {
        let api = |status| LlmError::Api {
            status,
            message: String::new(),
        };
        assert!(api(429).is_transient());
        assert!(api(503).is_transient());
        assert!(!api(400).is_transient());
        assert!(!LlmError::EmptyContent.is_transient());
    }

    #[test]
    fn test_chat_request_carries_schema_as_format() {
        let schema = serde_json::json!({"type": "object"});
        let body = ChatRequest {
            model: "llama3.2:1b",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            stream: false,
            format: &schema,
            options: ChatOptions { temperature: 0.0 },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["format"]["type"], "object");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
