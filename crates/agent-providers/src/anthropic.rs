//! Anthropic Provider
//!
//! Messages-API adapter. The system prompt moves to the top-level `system`
//! field, tool results travel as `tool_result` blocks inside user messages,
//! and consecutive same-role messages are coalesced into one wire message.

use agent_core::{
    AgentError, LlmProvider, Message, NormalizedReply, Result, Role, StopReason, ToolCall,
    ToolSchema,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::http;
use crate::retry::{self, RetryPolicy};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

#[derive(Debug)]
pub struct AnthropicProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
}

impl AnthropicProvider {
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

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
    }

    async fn send_once(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        model: &str,
    ) -> Result<NormalizedReply> {
        let (system, wire_messages) = to_wire_messages(messages);
        let payload = MessagesRequest {
            model,
            max_tokens: MAX_TOKENS,
            system,
            messages: wire_messages,
            tools: to_wire_tools(tools),
        };

        tracing::debug!(
            model,
            messages = messages.len(),
            tools = tools.len(),
            "sending messages request"
        );

        let response: MessagesResponse = http::send_json(
            "anthropic",
            self.request(reqwest::Method::POST, "/v1/messages").json(&payload),
        )
        .await?;

        normalize(response)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
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
        let response: ModelsResponse =
            http::send_json("anthropic", self.request(reqwest::Method::GET, "/v1/models")).await?;
        Ok(response.data.into_iter().map(|m| m.id).collect())
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<RespBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

/// Decoded leniently so unknown block types surface as malformed-response
/// errors instead of deserialization failures.
#[derive(Deserialize)]
struct RespBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

/// Split out the system prompt and convert the rest, merging consecutive
/// same-role wire messages (tool results become user-role blocks, so a run's
/// results plus the next prompt collapse into one user message).
fn to_wire_messages(messages: &[Message]) -> (Option<String>, Vec<WireMessage>) {
    let mut system: Option<String> = None;
    let mut wire: Vec<WireMessage> = Vec::new();

    let mut append = |role: &'static str, blocks: Vec<ContentBlock>| {
        if blocks.is_empty() {
            return;
        }
        match wire.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => wire.push(WireMessage {
                role,
                content: blocks,
            }),
        }
    };

    for msg in messages {
        match msg.role {
            Role::System => match &mut system {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(&msg.content);
                }
                None => system = Some(msg.content.clone()),
            },
            Role::User => append(
                "user",
                vec![ContentBlock::Text {
                    text: msg.content.clone(),
                }],
            ),
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !msg.content.is_empty() {
                    blocks.push(ContentBlock::Text {
                        text: msg.content.clone(),
                    });
                }
                for call in &msg.tool_calls {
                    blocks.push(ContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.arguments.clone(),
                    });
                }
                append("assistant", blocks);
            }
            Role::Tool => append(
                "user",
                vec![ContentBlock::ToolResult {
                    tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                    content: msg.content.clone(),
                }],
            ),
        }
    }

    (system, wire)
}

fn to_wire_tools(tools: &[ToolSchema]) -> Vec<WireTool> {
    tools
        .iter()
        .map(|tool| WireTool {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.parameters.clone(),
        })
        .collect()
}

fn normalize(response: MessagesResponse) -> Result<NormalizedReply> {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block.kind.as_str() {
            "text" => text.push_str(block.text.as_deref().unwrap_or_default()),
            "tool_use" => {
                let (Some(id), Some(name)) = (block.id, block.name) else {
                    return Err(AgentError::MalformedResponse(
                        "anthropic: tool_use block missing id or name".into(),
                    ));
                };
                tool_calls.push(ToolCall::new(
                    id,
                    name,
                    block.input.unwrap_or_else(|| serde_json::json!({})),
                ));
            }
            other => {
                return Err(AgentError::MalformedResponse(format!(
                    "anthropic: unsupported content block type '{}'",
                    other
                )));
            }
        }
    }

    let stop_reason = match response.stop_reason.as_deref() {
        Some("end_turn") => StopReason::EndTurn,
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::Length,
        Some(other) => StopReason::Other(other.to_string()),
        None if tool_calls.is_empty() => StopReason::EndTurn,
        None => StopReason::ToolUse,
    };

    Ok(NormalizedReply {
        text,
        tool_calls,
        stop_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_prompt_extracted() {
        let messages = vec![Message::system("be terse"), Message::user("hi")];
        let (system, wire) = to_wire_messages(&messages);
        assert_eq!(system.as_deref(), Some("be terse"));
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].role, "user");
    }

    #[test]
    fn test_consecutive_tool_results_coalesce() {
        let messages = vec![
            Message::assistant_with_calls(
                "",
                vec![
                    ToolCall::new("a", "one", json!({})),
                    ToolCall::new("b", "two", json!({})),
                ],
            ),
            Message::tool("r1", "a", "one"),
            Message::tool("r2", "b", "two"),
            Message::user("keep going"),
        ];
        let (_, wire) = to_wire_messages(&messages);

        // assistant turn, then one user message with both results + prompt
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[1].role, "user");
        assert_eq!(wire[1].content.len(), 3);
        assert!(matches!(
            &wire[1].content[0],
            ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "a"
        ));
    }

    #[test]
    fn test_normalize_tool_use_reply() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_1", "name": "search", "input": {"q": "rust"}}
            ],
            "stop_reason": "tool_use"
        }))
        .unwrap();

        let reply = normalize(response).unwrap();
        assert_eq!(reply.text, "Let me check.");
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].id, "toolu_1");
        assert_eq!(reply.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn test_normalize_rejects_unknown_block() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "content": [{"type": "thinking", "thinking": "..."}],
            "stop_reason": "end_turn"
        }))
        .unwrap();

        assert!(matches!(
            normalize(response),
            Err(AgentError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_wire_tool_uses_input_schema_key() {
        let tools = vec![ToolSchema::new("add", "Add numbers", json!({"type": "object"}))];
        let encoded = serde_json::to_value(to_wire_tools(&tools)).unwrap();
        assert_eq!(encoded[0]["input_schema"], json!({"type": "object"}));
    }
}
