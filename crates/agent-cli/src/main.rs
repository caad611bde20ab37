//! agentcore CLI
//!
//! Three commands: `agent` runs a goal-directed agent to completion, `chat`
//! opens an interactive session, `list` enumerates models per provider.
//!
//! Exit codes: 0 success, 1 run failed, 2 step limit exceeded, 3
//! configuration/credential error detected before any run started.

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "agentcore",
    version,
    about = "Chat with AI models and run AI agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an AI agent with a specific goal
    Agent {
        /// Model name (e.g. gpt-4o-mini, claude-sonnet-4-5, llama3.2)
        model: String,

        /// The goal for the agent to accomplish
        goal: String,

        /// Force a specific provider (openai, anthropic, gemini, ollama)
        #[arg(long)]
        provider: Option<String>,

        /// Reasoning strategy (react, planner, hybrid, simple)
        #[arg(long, default_value = "react")]
        agent_type: String,

        /// Maximum number of tool-calling steps
        #[arg(long)]
        step_limit: Option<usize>,

        /// MCP server locator (script path or command); repeatable
        #[arg(long = "mcp-server")]
        mcp_servers: Vec<String>,

        /// System prompt for the agent's conversation
        #[arg(long)]
        system_prompt: Option<String>,
    },

    /// Start an interactive chat session with the specified model
    Chat {
        /// Model name to chat with
        model: String,

        /// Force a specific provider (openai, anthropic, gemini, ollama)
        #[arg(long)]
        provider: Option<String>,

        /// System prompt for the conversation
        #[arg(long)]
        system_prompt: Option<String>,
    },

    /// List available models from all configured providers
    List,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Agent {
            model,
            goal,
            provider,
            agent_type,
            step_limit,
            mcp_servers,
            system_prompt,
        } => {
            commands::agent_command(commands::AgentArgs {
                model,
                goal,
                provider,
                agent_type,
                step_limit,
                mcp_servers,
                system_prompt,
            })
            .await
        }
        Commands::Chat {
            model,
            provider,
            system_prompt,
        } => commands::chat_command(&model, provider.as_deref(), system_prompt).await,
        Commands::List => commands::list_command().await,
    };

    std::process::exit(code);
}
