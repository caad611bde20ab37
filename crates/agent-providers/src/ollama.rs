//! Ollama Provider
//!
//! Local-inference adapter over the `/api/chat` endpoint. No credentials;
//! host and port come from the environment. Reasoning-model `<think>` spans
//! are stripped from assistant text before normalization.

use agent_core::{
    LlmProvider, Message, NormalizedReply, Result, Role, StopReason, ToolCall, ToolSchema,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::http;
use crate::retry::{self, RetryPolicy};

/// Context window requested per chat call (Ollama defaults to 2048)
const NUM_CTX: u32 = 32768;

/// Ollama connection configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "http://localhost".into());
        let port = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434);

        Self { host, port }
    }

    fn base_url(&self) -> String {
        format!("{}:{}", self.host.trim_end_matches('/'), self.port)
    }
}

#[derive(Debug)]
pub struct OllamaProvider {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl OllamaProvider {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::from_config(OllamaConfig {
            host: host.into(),
            port,
        })
    }

    pub fn from_config(config: OllamaConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_env() -> Self {
        Self::from_config(OllamaConfig::from_env())
    }

    async fn send_once(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        model: &str,
    ) -> Result<NormalizedReply> {
        let payload = ChatRequest {
            model,
            messages: to_wire_messages(messages),
            tools: to_wire_tools(tools),
            stream: false,
            options: json!({"num_ctx": NUM_CTX}),
        };

        tracing::debug!(
            model,
            messages = messages.len(),
            tools = tools.len(),
            "sending chat request"
        );

        let url = format!("{}/api/chat", self.base_url);
        let response: ChatResponse =
            http::send_json("ollama", self.http.post(&url).json(&payload)).await?;

        Ok(normalize(response))
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn send(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        model: &str,
    ) -> Result<NormalizedReply> {
        retry::with_backoff(&self.retry, || self.send_once(messages, tools, model)).await
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response: TagsResponse = http::send_json("ollama", self.http.get(&url)).await?;
        Ok(response.models.into_iter().map(|m| m.name).collect())
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    stream: bool,
    options: Value,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<Value>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: RespMessage,
    #[serde(default)]
    done_reason: Option<String>,
}

#[derive(Deserialize)]
struct RespMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<RespToolCall>,
}

#[derive(Deserialize)]
struct RespToolCall {
    function: RespFunction,
}

#[derive(Deserialize)]
struct RespFunction {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

fn to_wire_messages(messages: &[Message]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|msg| {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let tool_calls = (!msg.tool_calls.is_empty()).then(|| {
                msg.tool_calls
                    .iter()
                    .map(|call| json!({"function": {"name": call.name, "arguments": call.arguments}}))
                    .collect()
            });
            WireMessage {
                role,
                content: msg.content.clone(),
                tool_calls,
            }
        })
        .collect()
}

fn to_wire_tools(tools: &[ToolSchema]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters
                }
            })
        })
        .collect()
}

fn normalize(response: ChatResponse) -> NormalizedReply {
    let text = strip_think_blocks(&response.message.content);

    let tool_calls: Vec<ToolCall> = response
        .message
        .tool_calls
        .into_iter()
        .map(|call| {
            ToolCall::with_generated_id(
                call.function.name,
                call.function.arguments.unwrap_or_else(|| json!({})),
            )
        })
        .collect();

    let stop_reason = match response.done_reason.as_deref() {
        _ if !tool_calls.is_empty() => StopReason::ToolUse,
        Some("stop") | None => StopReason::EndTurn,
        Some("length") => StopReason::Length,
        Some(other) => StopReason::Other(other.to_string()),
    };

    NormalizedReply {
        text,
        tool_calls,
        stop_reason,
    }
}

/// Remove `<think>...</think>` spans emitted by reasoning models. An
/// unterminated span drops the remainder of the text.
fn strip_think_blocks(text: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        match rest[start..].find(CLOSE) {
            Some(end) => rest = &rest[start + end + CLOSE.len()..],
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_think_blocks() {
        assert_eq!(
            strip_think_blocks("<think>hmm</think>The answer is 4."),
            "The answer is 4."
        );
        assert_eq!(
            strip_think_blocks("a<think>x</think>b<think>y</think>c"),
            "abc"
        );
        assert_eq!(strip_think_blocks("plain text"), "plain text");
        assert_eq!(strip_think_blocks("cut off<think>never ends"), "cut off");
    }

    #[test]
    fn test_normalize_synthesizes_ids() {
        let response: ChatResponse = serde_json::from_value(json!({
            "message": {
                "content": "",
                "tool_calls": [
                    {"function": {"name": "add", "arguments": {"a": 1, "b": 2}}}
                ]
            },
            "done_reason": "stop"
        }))
        .unwrap();

        let reply = normalize(response);
        assert_eq!(reply.tool_calls.len(), 1);
        assert!(!reply.tool_calls[0].id.is_empty());
        assert_eq!(reply.tool_calls[0].arguments, json!({"a": 1, "b": 2}));
        assert_eq!(reply.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn test_config_from_parts() {
        let config = OllamaConfig::default();
        assert_eq!(config.base_url(), "http://localhost:11434");
    }

    #[test]
    fn test_request_omits_empty_tools() {
        let payload = ChatRequest {
            model: "llama3.2",
            messages: to_wire_messages(&[Message::user("hi")]),
            tools: vec![],
            stream: false,
            options: json!({"num_ctx": NUM_CTX}),
        };
        let encoded = serde_json::to_value(&payload).unwrap();
        assert!(encoded.get("tools").is_none());
        assert_eq!(encoded["options"]["num_ctx"], 32768);
    }
}
