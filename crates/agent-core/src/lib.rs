//! # agent-core
//!
//! Agent execution engine with provider-agnostic LLM abstraction and a
//! merged local/MCP tool registry.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Agent                                │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────────────┐  │
//! │  │   Strategy  │  │     Tool     │  │    Conversation     │  │
//! │  │State Machine│──│   Registry   │  │  ┌───────────────┐  │  │
//! │  └─────────────┘  └──────────────┘  │  │  LlmProvider  │  │  │
//! │                                     │  └───────────────┘  │  │
//! │                                     └─────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` trait lets the engine drive OpenAI, Anthropic, Gemini,
//! or Ollama backends without changing agent logic; the `Tool` trait lets it
//! dispatch local and MCP-hosted tools through one registry.

pub mod conversation;
pub mod engine;
pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

pub use conversation::Conversation;
pub use engine::{Agent, AgentRun, AgentStatus, AgentType, AsyncResource, CancelHandle};
pub use error::{AgentError, Result};
pub use message::{History, Message, Role, ToolCall};
pub use provider::{LlmProvider, NormalizedReply, StopReason, ToolSchema};
pub use tool::{Tool, ToolOrigin, ToolRegistry, ToolResult};
