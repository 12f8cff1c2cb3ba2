//! OpenAI-compatible chat client with native tool calling.
//!
//! One `/chat/completions` endpoint serves the whole system: the Brain's
//! ReAct loop (with tool definitions) and the Voice pipeline's plain text
//! generation (no tools). The model behind the endpoint is a black box.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use soms_config::LlmConfig;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("LLM API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("LLM response missing choices")]
    EmptyResponse,
}

// ── Chat message types ───────────────────────────────────────────────────────

/// Role in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Option<String>,
    /// Tool calls requested by the assistant (assistant messages only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// When role == Tool, identifies which tool call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: Some(content.into()), tool_calls: vec![], tool_call_id: None }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: Some(content.into()), tool_calls: vec![], tool_call_id: None }
    }
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self { role: ChatRole::Assistant, content, tool_calls, tool_call_id: None }
    }
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: ChatRole::Tool, content: Some(content.into()), tool_calls: vec![], tool_call_id: Some(tool_call_id.into()) }
    }
}

/// A tool call requested by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    /// Always "function" for OpenAI-compatible APIs.
    #[serde(default = "default_tool_call_type")]
    pub r#type: String,
    pub function: ToolCallFunction,
}

fn default_tool_call_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    /// On the wire this is a JSON-encoded string; [`ToolCallFunction::args`]
    /// yields the parsed object either way.
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCallFunction {
    /// Normalize arguments to a JSON object regardless of wire encoding.
    pub fn args(&self) -> Value {
        match &self.arguments {
            Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|_| json!({})),
            Value::Object(_) => self.arguments.clone(),
            _ => json!({}),
        }
    }
}

/// Response from a chat call.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    /// Tool calls the assistant wants to make (empty for plain text).
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: String,
}

// ── Client ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl ChatClient {
    /// Build on a shared pooled client so connections are reused across the
    /// process (the Brain, Voice, and bridge all share one).
    pub fn new(client: reqwest::Client, config: LlmConfig) -> Self {
        Self { client, config }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send `messages` (with optional OpenAI `tools` definitions) and parse
    /// the first choice. Tool-call ids missing from the response are filled
    /// in so results can always be correlated.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&Value>,
    ) -> Result<ChatResponse, LlmError> {
        let endpoint = format!(
            "{}/chat/completions",
            self.config.api_url.trim_end_matches('/')
        );

        let mut payload = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });
        if let Some(tools) = tools {
            payload["tools"] = tools.clone();
        }

        debug!(endpoint = %endpoint, messages = messages.len(), "LLM chat request");
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.config.api_key)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or(LlmError::EmptyResponse)?;

        let message = choice.get("message").cloned().unwrap_or_default();
        let content = message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();

        let mut tool_calls: Vec<ToolCall> = message
            .get("tool_calls")
            .map(|calls| serde_json::from_value(calls.clone()).unwrap_or_default())
            .unwrap_or_default();
        for (i, call) in tool_calls.iter_mut().enumerate() {
            if call.id.is_empty() {
                call.id = format!("call_{i}");
                warn!(tool = %call.function.name, "tool call arrived without id");
            }
        }

        let finish_reason = choice
            .get("finish_reason")
            .and_then(|f| f.as_str())
            .unwrap_or("stop")
            .to_string();

        Ok(ChatResponse {
            content,
            tool_calls,
            finish_reason,
        })
    }

    /// Plain single-prompt completion, used by the voice text generators.
    pub async fn complete_text(&self, prompt: &str) -> Result<String, LlmError> {
        let messages = [ChatMessage::user(prompt)];
        let response = self.chat(&messages, None).await?;
        Ok(response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_args_accepts_string_encoding() {
        let call: ToolCall = serde_json::from_value(json!({
            "id": "call_0",
            "type": "function",
            "function": {
                "name": "create_task",
                "arguments": "{\"title\": \"Ventilate\", \"urgency\": 3}"
            }
        }))
        .unwrap();
        let args = call.function.args();
        assert_eq!(args["title"], "Ventilate");
        assert_eq!(args["urgency"], 3);
    }

    #[test]
    fn tool_call_args_accepts_object_encoding() {
        let call: ToolCall = serde_json::from_value(json!({
            "function": {
                "name": "speak",
                "arguments": {"message": "hello", "zone": "main"}
            }
        }))
        .unwrap();
        assert_eq!(call.r#type, "function");
        assert_eq!(call.function.args()["zone"], "main");
    }

    #[test]
    fn malformed_arguments_degrade_to_empty_object() {
        let call = ToolCall {
            id: "call_0".into(),
            r#type: "function".into(),
            function: ToolCallFunction {
                name: "speak".into(),
                arguments: Value::String("not json".into()),
            },
        };
        assert_eq!(call.function.args(), json!({}));
    }

    #[test]
    fn tool_result_message_serializes_with_call_id() {
        let msg = ChatMessage::tool_result("call_3", "done");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "call_3");
        assert!(value.get("tool_calls").is_none());
    }
}
