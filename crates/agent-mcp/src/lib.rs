//! # agent-mcp
//!
//! MCP (Model Context Protocol) client bridge for agentcore. Launches one
//! stdio server process per client, lists its tools over JSON-RPC, and
//! forwards invocation round trips keyed by call id. MCP tools plug into
//! the `agent_core` tool registry behind the same `Tool` trait as local
//! tools.
//!
//! Current scope is one server per engine instance; multi-server fan-out is
//! a known limitation.

pub mod client;
pub mod error;
pub mod tools;

pub use client::{McpClient, McpToolInfo, ServerSpec};
pub use error::{McpError, Result};
pub use tools::{McpTool, register_tools};
