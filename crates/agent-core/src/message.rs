//! Conversation Messages
//!
//! Standard message format shared by every provider adapter and the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a message sender
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant (LLM) response
    Assistant,
    /// Tool result (folded back as context)
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A structured tool invocation request issued by the model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id, either provider-issued or synthesized
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Argument payload as a JSON object
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Create a call with a fresh v4 id
    pub fn with_generated_id(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), name, arguments)
    }
}

/// A single message in a conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: Role,

    /// Text content; may be empty when an assistant message carries only tool calls
    pub content: String,

    /// Tool name on `tool` messages (some providers key results by name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tool calls requested by an assistant message, in provider order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Originating call id on `tool` messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant message carrying tool calls
    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::new(Role::Assistant, content);
        msg.tool_calls = tool_calls;
        msg
    }

    /// Create a tool result message answering `call_id` from tool `name`
    pub fn tool(
        content: impl Into<String>,
        call_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = Some(call_id.into());
        msg.name = Some(name.into());
        msg
    }
}

/// Ordered message history for one run. Append-only while a run is active;
/// context-window management is the caller's policy.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        let mut history = Self::new();
        history.push(Message::system(prompt));
        history
    }

    /// Append a message
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Get all messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get the last message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Check the tool-call correlation invariant: every `tool` message must
    /// answer exactly one prior assistant tool call, and the results of one
    /// assistant turn must appear in the order the calls were issued.
    pub fn tool_correlation_ok(&self) -> bool {
        let mut issued: Vec<&str> = Vec::new();
        let mut answered = 0usize;

        for msg in &self.messages {
            match msg.role {
                Role::Assistant => {
                    if !msg.tool_calls.is_empty() {
                        issued = msg.tool_calls.iter().map(|c| c.id.as_str()).collect();
                        answered = 0;
                    }
                }
                Role::Tool => {
                    let Some(id) = msg.tool_call_id.as_deref() else {
                        return false;
                    };
                    if answered >= issued.len() || issued[answered] != id {
                        return false;
                    }
                    answered += 1;
                }
                _ => {}
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello");
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn test_tool_message_carries_correlation() {
        let msg = Message::tool("42", "call_1", "calculate");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.name.as_deref(), Some("calculate"));
    }

    #[test]
    fn test_correlation_invariant_holds_in_order() {
        let mut history = History::with_system_prompt("sys");
        history.push(Message::user("go"));
        history.push(Message::assistant_with_calls(
            "",
            vec![
                ToolCall::new("a", "one", json!({})),
                ToolCall::new("b", "two", json!({})),
            ],
        ));
        history.push(Message::tool("r1", "a", "one"));
        history.push(Message::tool("r2", "b", "two"));
        assert!(history.tool_correlation_ok());
    }

    #[test]
    fn test_correlation_invariant_rejects_reordered_results() {
        let mut history = History::new();
        history.push(Message::assistant_with_calls(
            "",
            vec![
                ToolCall::new("a", "one", json!({})),
                ToolCall::new("b", "two", json!({})),
            ],
        ));
        history.push(Message::tool("r2", "b", "two"));
        assert!(!history.tool_correlation_ok());
    }

    #[test]
    fn test_correlation_invariant_rejects_orphan_result() {
        let mut history = History::new();
        history.push(Message::user("hi"));
        history.push(Message::tool("r", "ghost", "one"));
        assert!(!history.tool_correlation_ok());
    }
}
