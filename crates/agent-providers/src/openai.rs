//! OpenAI Provider
//!
//! Chat-completions adapter. Tool-call arguments arrive as JSON text and are
//! parsed into structured payloads; an unparseable call fails the turn
//! rather than being dropped.

use agent_core::{
    AgentError, LlmProvider, Message, NormalizedReply, Result, Role, StopReason, ToolCall,
    ToolSchema,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::http;
use crate::retry::{self, RetryPolicy};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

#[derive(Debug)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        }
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
        };

        tracing::debug!(
            model,
            messages = messages.len(),
            tools = tools.len(),
            "sending chat completion request"
        );

        let url = format!("{}/v1/chat/completions", self.base_url);
        let response: ChatResponse = http::send_json(
            "openai",
            self.http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&payload),
        )
        .await?;

        normalize(response)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
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
        let url = format!("{}/v1/models", self.base_url);
        let response: ModelsResponse =
            http::send_json("openai", self.http.get(&url).bearer_auth(&self.api_key)).await?;
        Ok(response.data.into_iter().map(|m| m.id).collect())
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
    tools: Vec<WireTool>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireCallFunction,
}

#[derive(Serialize)]
struct WireCallFunction {
    name: String,
    /// OpenAI transports arguments as JSON text
    arguments: String,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireToolFunction,
}

#[derive(Serialize)]
struct WireToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: RespMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct RespMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<RespToolCall>,
}

#[derive(Deserialize)]
struct RespToolCall {
    id: String,
    function: RespFunction,
}

#[derive(Deserialize)]
struct RespFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

fn to_wire_messages(messages: &[Message]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|msg| match msg.role {
            Role::Tool => WireMessage {
                role: "tool",
                content: Some(msg.content.clone()),
                tool_calls: None,
                tool_call_id: msg.tool_call_id.clone(),
            },
            Role::Assistant if !msg.tool_calls.is_empty() => WireMessage {
                role: "assistant",
                content: (!msg.content.is_empty()).then(|| msg.content.clone()),
                tool_calls: Some(
                    msg.tool_calls
                        .iter()
                        .map(|call| WireToolCall {
                            id: call.id.clone(),
                            kind: "function",
                            function: WireCallFunction {
                                name: call.name.clone(),
                                arguments: call.arguments.to_string(),
                            },
                        })
                        .collect(),
                ),
                tool_call_id: None,
            },
            _ => WireMessage {
                role: match msg.role {
                    Role::System => "system",
                    Role::Assistant => "assistant",
                    _ => "user",
                },
                content: Some(msg.content.clone()),
                tool_calls: None,
                tool_call_id: None,
            },
        })
        .collect()
}

fn to_wire_tools(tools: &[ToolSchema]) -> Vec<WireTool> {
    tools
        .iter()
        .map(|tool| WireTool {
            kind: "function",
            function: WireToolFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            },
        })
        .collect()
}

fn normalize(response: ChatResponse) -> Result<NormalizedReply> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AgentError::MalformedResponse("openai: reply has no choices".into()))?;

    let mut tool_calls = Vec::with_capacity(choice.message.tool_calls.len());
    for call in choice.message.tool_calls {
        let arguments = serde_json::from_str(&call.function.arguments).map_err(|err| {
            AgentError::MalformedResponse(format!(
                "openai: unparseable arguments for tool call '{}': {}",
                call.function.name, err
            ))
        })?;
        tool_calls.push(ToolCall::new(call.id, call.function.name, arguments));
    }

    let stop_reason = match choice.finish_reason.as_deref() {
        Some("stop") => StopReason::EndTurn,
        Some("tool_calls") => StopReason::ToolUse,
        Some("length") => StopReason::Length,
        Some(other) => StopReason::Other(other.to_string()),
        None if tool_calls.is_empty() => StopReason::EndTurn,
        None => StopReason::ToolUse,
    };

    Ok(NormalizedReply {
        text: choice.message.content.unwrap_or_default(),
        tool_calls,
        stop_reason,
    })
}
