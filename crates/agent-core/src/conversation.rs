//! Conversation
//!
//! Ordered message history for one logical dialogue with one provider,
//! exposing the single-turn generate operation. Owned exclusively by one
//! engine instance or one interactive chat session.

use std::sync::Arc;

use crate::error::{AgentError, Result};
use crate::message::{History, Message, ToolCall};
use crate::provider::{LlmProvider, NormalizedReply, ToolSchema};
use crate::tool::ToolResult;

pub struct Conversation {
    provider: Arc<dyn LlmProvider>,
    model: String,
    history: History,
    closed: bool,
}

impl Conversation {
    /// Create a conversation with an empty history
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            history: History::new(),
            closed: false,
        }
    }

    /// Create a conversation whose first message is the system prompt
    pub fn with_system_prompt(
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        let mut conversation = Self::new(provider, model);
        conversation.history = History::with_system_prompt(system_prompt);
        conversation
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages(&self) -> &[Message] {
        self.history.messages()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Append a user message without generating a reply (e.g. goal framing)
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.history.push(Message::user(content));
    }

    /// Append the user message, send the full history to the provider, and
    /// append the assistant reply (text plus any tool calls). Returns the
    /// normalized reply so the caller can decide whether further action is
    /// needed. History is append-only; nothing is ever truncated here.
    pub async fn generate_response(
        &mut self,
        user_message: impl Into<String>,
        tools: &[ToolSchema],
    ) -> Result<NormalizedReply> {
        if self.closed {
            return Err(AgentError::ConversationClosed);
        }

        self.history.push(Message::user(user_message));

        let reply = self
            .provider
            .send(self.history.messages(), tools, &self.model)
            .await?;

        self.history.push(Message::assistant_with_calls(
            reply.text.clone(),
            reply.tool_calls.clone(),
        ));

        Ok(reply)
    }

    /// Fold a tool outcome back into history as a `tool` message
    pub fn push_tool_result(&mut self, call: &ToolCall, result: &ToolResult) {
        let content = if result.is_error {
            format!("[Tool '{}' failed]\n{}", call.name, result.content)
        } else {
            result.content.clone()
        };
        self.history.push(Message::tool(content, &call.id, &call.name));
    }

    /// Release the underlying provider connection. Safe to call multiple
    /// times; every code path out of a run must reach it exactly once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        tracing::debug!(provider = self.provider.name(), "conversation closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
