//! LLM Provider Strategy Pattern
//!
//! Defines a common interface for all LLM providers (OpenAI, Anthropic,
//! Gemini, Ollama) so the engine can work with any backend without code
//! changes. Each adapter translates the neutral history + tool schemas into
//! its backend's call and folds the reply back into a [`NormalizedReply`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{Message, ToolCall};

/// Tool advertisement sent to the provider alongside the history.
///
/// `parameters` is a JSON-Schema object, which is what every backend's
/// function-calling API consumes and what MCP servers publish, so local and
/// remote tools share one format.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to the model)
    pub description: String,

    /// JSON-Schema object describing the arguments
    pub parameters: serde_json::Value,
}

impl ToolSchema {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Why the provider stopped generating
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of the assistant turn
    EndTurn,
    /// The model stopped to request tool execution
    ToolUse,
    /// Output limit reached; the reply may be truncated
    Length,
    /// Provider-specific reason passed through verbatim
    Other(String),
}

/// Provider reply normalized into the neutral model.
///
/// Tool calls are kept in the order the provider returned them. Adapters
/// must not drop a call they cannot parse; they fail the turn with
/// [`crate::AgentError::MalformedResponse`] instead.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NormalizedReply {
    /// Assistant text; empty when the reply carries only tool calls
    pub text: String,

    /// Tool invocation requests, in provider order
    pub tool_calls: Vec<ToolCall>,

    /// Why generation stopped
    pub stop_reason: StopReason,
}

impl NormalizedReply {
    /// Text-only reply ending the turn naturally
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
        }
    }

    /// Reply that pauses for tool execution
    pub fn with_tool_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: text.into(),
            tool_calls,
            stop_reason: StopReason::ToolUse,
        }
    }
}

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new backends. The engine and
/// `Conversation` work exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync + std::fmt::Debug {
    /// Short provider identifier (e.g. "openai", "ollama")
    fn name(&self) -> &str;

    /// Send the full history and tool advertisements, get the normalized reply.
    ///
    /// Retryable failures (rate limit, network) are retried with bounded
    /// backoff inside the adapter; anything that escapes is final.
    async fn send(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        model: &str,
    ) -> Result<NormalizedReply>;

    /// List model identifiers available from this provider
    async fn list_models(&self) -> Result<Vec<String>>;
}
