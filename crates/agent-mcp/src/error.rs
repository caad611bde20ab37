//! MCP bridge error types

use agent_core::AgentError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, McpError>;

#[derive(Error, Debug)]
pub enum McpError {
    #[error("failed to spawn MCP server '{server}': {source}")]
    Spawn {
        server: String,
        source: std::io::Error,
    },

    #[error("MCP transport error ({server}): {message}")]
    Transport { server: String, message: String },

    #[error("MCP server '{server}' returned error {code}: {message}")]
    Rpc {
        server: String,
        code: i64,
        message: String,
    },

    #[error("call to MCP server '{server}' timed out after {seconds}s")]
    Timeout { server: String, seconds: u64 },

    #[error("MCP server '{server}' terminated")]
    Terminated { server: String },

    #[error("invalid JSON payload ({server}): {source}")]
    InvalidJson {
        server: String,
        source: serde_json::Error,
    },
}

/// A failed MCP round trip surfaces to the engine as a tool error, never a
/// crash: the server reporting a failure is an execution error, everything
/// else means the tool's backend is unavailable.
impl From<McpError> for AgentError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::Rpc { .. } => AgentError::ToolExecution(err.to_string()),
            _ => AgentError::ToolUnavailable(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping_into_tool_taxonomy() {
        let timeout = McpError::Timeout {
            server: "demo".into(),
            seconds: 30,
        };
        assert!(matches!(
            AgentError::from(timeout),
            AgentError::ToolUnavailable(_)
        ));

        let rpc = McpError::Rpc {
            server: "demo".into(),
            code: -32000,
            message: "boom".into(),
        };
        assert!(matches!(AgentError::from(rpc), AgentError::ToolExecution(_)));
    }
}
