//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Missing credential or invalid configuration, detected before a run starts
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider rejected the credentials
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Provider rate limit hit
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Transport-level failure reaching the provider
    #[error("Network error: {0}")]
    Network(String),

    /// Provider reply could not be decoded into the normalized model
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    /// Any other provider-side failure (not retryable)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Tool not found in registry
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// A tool with this name is already registered
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    /// Tool arguments failed validation
    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    /// Tool backend (e.g. MCP server) unreachable
    #[error("Tool unavailable: {0}")]
    ToolUnavailable(String),

    /// Tool ran but reported a failure
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// The model refused to act after repeated prompting
    #[error("Agent produced no tool call after {0} attempts")]
    NoActionTaken(usize),

    /// Run was cancelled from outside
    #[error("Run cancelled")]
    Cancelled,

    /// Operation attempted on a closed conversation
    #[error("Conversation is closed")]
    ConversationClosed,

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Check if the error is worth retrying with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::RateLimited(_) | AgentError::Network(_))
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Config(msg) => format!("Configuration problem: {}", msg),
            AgentError::Auth(_) => "Authentication failed. Check your API key.".into(),
            AgentError::RateLimited(_) => {
                "The provider is rate limiting requests. Please wait and retry.".into()
            }
            AgentError::Network(_) => "Could not reach the provider. Check your connection.".into(),
            AgentError::MalformedResponse(msg) => {
                format!("The provider returned an unreadable response: {}", msg)
            }
            AgentError::Provider(msg) => format!("The model service reported an error: {}", msg),
            AgentError::ToolNotFound(name) => format!("The tool '{}' is not available.", name),
            AgentError::DuplicateTool(name) => {
                format!("A tool named '{}' is already registered.", name)
            }
            AgentError::InvalidArguments(msg) => format!("Invalid tool input: {}", msg),
            AgentError::ToolUnavailable(msg) => format!("Tool backend unavailable: {}", msg),
            AgentError::ToolExecution(msg) => format!("Tool error: {}", msg),
            AgentError::NoActionTaken(_) => {
                "The model would not take an action toward the goal.".into()
            }
            AgentError::Cancelled => "The run was cancelled.".into(),
            AgentError::ConversationClosed => "This conversation has been closed.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Provider(err.to_string())
    }
}
