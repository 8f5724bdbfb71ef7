use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::error::{AppError, Result};
use crate::retry::RetryPolicy;

/// A chat-completion backend. The agents only see this seam.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: &str, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.to_string()),
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, exactly as the model produced them.
    #[serde(default)]
    pub arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Backend-neutral request: a system prompt, the conversation, and tools.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    /// Ask for a JSON object instead of free text.
    pub json_output: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
    pub usage: Usage,
}

/// OpenAI-compatible `/chat/completions` client (OpenRouter, vLLM, ...).
pub struct ModelClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    retry: RetryPolicy,
}

impl ModelClient {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.id.clone(),
            max_tokens: config.max_tokens,
            retry: RetryPolicy::for_model(config.max_attempts),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, request: &CompletionRequest) -> Result<Completion> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(ChatMessage {
            role: Role::System,
            content: Some(request.system.clone()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        });
        messages.extend(request.messages.iter().cloned());

        let body = ChatCompletionsRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: &messages,
            tools: request
                .tools
                .iter()
                .map(|function| ToolSpec {
                    kind: "function",
                    function,
                })
                .collect(),
            response_format: request
                .json_output
                .then(|| serde_json::json!({ "type": "json_object" })),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("API returned {status}: {body}");
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => AppError::ModelRateLimited(message),
                StatusCode::REQUEST_TIMEOUT => AppError::ModelTransient(message),
                s if s.is_server_error() => AppError::ModelTransient(message),
                _ => AppError::ModelApi(message),
            });
        }

        let parsed: ChatCompletionsResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::ModelApi("Response contained no choices".to_string()))?;

        Ok(Completion {
            message: choice.message,
            finish_reason: choice.finish_reason,
            usage: parsed.usage.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ModelBackend for ModelClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.retry
            .run("model_completion", || self.send(request))
            .await
    }
}

// --- Wire types ---

#[derive(Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSpec<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct ToolSpec<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolDefinition,
}

#[derive(Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
    finish_reason: Option<String>,
}


#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: &str) -> ModelConfig {
        ModelConfig {
            id: "openai/gpt-4o-mini".to_string(),
            endpoint: endpoint.to_string(),
            api_key: "sk-test".to_string(),
            max_tokens: 512,
            request_timeout_secs: 5,
            max_attempts: 2,
        }
    }

    fn instant() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: 0.0,
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "You are a reviewer.".to_string(),
            messages: vec![ChatMessage::user("Review this diff")],
            tools: Vec::new(),
            json_output: true,
        }
    }

    #[tokio::test]
    async fn test_complete_parses_tool_calls() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "choices": [{
                        "message": {
                            "role": "assistant",
                            "content": null,
                            "tool_calls": [{
                                "id": "call_1",
                                "type": "function",
                                "function": {"name": "read_file", "arguments": "{\"path\":\"app.py\"}"}
                            }]
                        },
                        "finish_reason": "tool_calls"
                    }],
                    "usage": {"prompt_tokens": 12, "completion_tokens": 3}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = ModelClient::new(&config(&server.url())).unwrap();
        let completion = client.complete(&request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(completion.message.tool_calls.len(), 1);
        assert_eq!(completion.message.tool_calls[0].function.name, "read_file");
        assert_eq!(completion.usage.prompt_tokens, 12);
        assert_eq!(completion.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried_then_surfaces() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("slow down")
            .expect(2)
            .create_async()
            .await;

        let client = ModelClient::new(&config(&server.url()))
            .unwrap()
            .with_retry(instant());
        let err = client.complete(&request()).await.unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, AppError::ModelApi(ref m) if m.contains("429")));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("bad key")
            .expect(1)
            .create_async()
            .await;

        let client = ModelClient::new(&config(&server.url()))
            .unwrap()
            .with_retry(instant());
        let err = client.complete(&request()).await.unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, AppError::ModelApi(_)));
    }
}
