//! Command implementations for the CLI.

use std::str::FromStr;
use std::sync::Arc;

use agent_core::tool::{CalculatorTool, DateTimeTool};
use agent_core::{Agent, AgentError, AgentStatus, AgentType, Conversation, Result, ToolRegistry};
use agent_mcp::{McpClient, ServerSpec, register_tools};
use agent_providers::{ProviderKind, ProviderSettings, connect};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub const EXIT_OK: i32 = 0;
pub const EXIT_RUN_FAILED: i32 = 1;
pub const EXIT_STEP_LIMIT: i32 = 2;
pub const EXIT_CONFIG: i32 = 3;

pub struct AgentArgs {
    pub model: String,
    pub goal: String,
    pub provider: Option<String>,
    pub agent_type: String,
    pub step_limit: Option<usize>,
    pub mcp_servers: Vec<String>,
    pub system_prompt: Option<String>,
}

/// Run an agent to a terminal state and map it to an exit code.
pub async fn agent_command(args: AgentArgs) -> i32 {
    let mut agent = match build_agent(&args).await {
        Ok(agent) => agent,
        Err(err) => {
            eprintln!("Configuration error: {}", err.user_message());
            return EXIT_CONFIG;
        }
    };

    // Ctrl-C aborts the run at its next suspension point; cleanup still runs.
    let cancel = agent.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupt received, cancelling run...");
            cancel.cancel();
        }
    });

    println!("Running {} agent with {}", agent.agent_type(), args.model);
    let run = agent.run(&args.goal).await;
    agent.close().await;

    println!();
    match run.status {
        AgentStatus::Succeeded => {
            println!("Goal achieved in {} step(s).", run.steps);
            if !run.summary.is_empty() {
                println!("{}", run.summary);
            }
            EXIT_OK
        }
        AgentStatus::StepLimitExceeded => {
            eprintln!("{}", run.summary);
            EXIT_STEP_LIMIT
        }
        AgentStatus::Failed | AgentStatus::Running => {
            eprintln!("Agent run failed: {}", run.summary);
            EXIT_RUN_FAILED
        }
    }
}

async fn build_agent(args: &AgentArgs) -> Result<Agent> {
    let kind = resolve_provider(args.provider.as_deref(), &args.model)?;
    let agent_type = AgentType::from_str(&args.agent_type)?;

    let settings = ProviderSettings::from_env();
    let provider = connect(kind, &settings)?;

    let mut registry = ToolRegistry::new();
    registry.register(DateTimeTool)?;
    registry.register(CalculatorTool)?;

    let mut builder = Agent::builder()
        .provider(provider)
        .model(args.model.as_str())
        .agent_type(agent_type);

    if let Some(limit) = args.step_limit {
        builder = builder.step_limit(limit);
    }
    if let Some(prompt) = &args.system_prompt {
        builder = builder.system_prompt(prompt.as_str());
    }

    // One MCP server per run; extra locators are a known limitation.
    if let Some(locator) = args.mcp_servers.first() {
        if args.mcp_servers.len() > 1 {
            tracing::warn!("only one MCP server per run is supported; using the first");
        }
        let spec = ServerSpec::parse(locator);
        let client = McpClient::connect(spec)
            .await
            .map_err(|err| AgentError::Config(format!("MCP server unavailable: {}", err)))?;
        let count = register_tools(&mut registry, &client).await?;
        tracing::info!(server = client.server_id(), count, "registered MCP tools");
        builder = builder.resource(Arc::new(client));
    }

    builder.tools(registry).build()
}

/// Interactive chat over a bare conversation (no tools).
pub async fn chat_command(
    model: &str,
    provider: Option<&str>,
    system_prompt: Option<String>,
) -> i32 {
    let settings = ProviderSettings::from_env();
    let provider = match resolve_provider(provider, model).and_then(|kind| connect(kind, &settings))
    {
        Ok(provider) => provider,
        Err(err) => {
            eprintln!("Configuration error: {}", err.user_message());
            return EXIT_CONFIG;
        }
    };

    let mut conversation = match system_prompt {
        Some(prompt) => Conversation::with_system_prompt(provider, model, prompt),
        None => Conversation::new(provider, model),
    };

    println!("Chat session with {} (type 'quit' or 'exit' to end)", model);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        if stdout.write_all(b"> ").await.is_err() || stdout.flush().await.is_err() {
            break;
        }

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        let input = line.trim();

        if input.is_empty() {
            continue;
        }
        if matches!(input.to_ascii_lowercase().as_str(), "quit" | "exit" | "q") {
            break;
        }

        match conversation.generate_response(input, &[]).await {
            Ok(reply) => println!("{}: {}", model, reply.text.trim()),
            Err(err) => eprintln!("Error generating response: {}", err.user_message()),
        }
    }

    conversation.close();
    println!("Goodbye!");
    EXIT_OK
}

/// List models from every configured provider.
pub async fn list_command() -> i32 {
    let settings = ProviderSettings::from_env();
    println!("Fetching available models from all providers...");

    for kind in [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Gemini,
        ProviderKind::Ollama,
    ] {
        match connect(kind, &settings) {
            Ok(provider) => match provider.list_models().await {
                Ok(models) if models.is_empty() => println!("{}: no models found", kind),
                Ok(models) => {
                    println!("{}:", kind);
                    for model in models {
                        println!("  {}", model);
                    }
                }
                Err(err) => println!("{}: unavailable ({})", kind, err.user_message()),
            },
            Err(_) => println!("{}: not configured", kind),
        }
    }

    EXIT_OK
}

fn resolve_provider(explicit: Option<&str>, model: &str) -> Result<ProviderKind> {
    match explicit {
        Some(name) => name.parse(),
        None => Ok(infer_provider_kind(model)),
    }
}

/// Static model-name heuristic used only when `--provider` is omitted.
fn infer_provider_kind(model: &str) -> ProviderKind {
    let model = model.to_ascii_lowercase();
    if model.starts_with("gpt-")
        || model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
        || model.starts_with("chatgpt")
    {
        ProviderKind::OpenAi
    } else if model.starts_with("claude") {
        ProviderKind::Anthropic
    } else if model.trim_start_matches("models/").starts_with("gemini") {
        ProviderKind::Gemini
    } else {
        ProviderKind::Ollama
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_inference() {
        assert_eq!(infer_provider_kind("gpt-4o-mini"), ProviderKind::OpenAi);
        assert_eq!(infer_provider_kind("o3-mini"), ProviderKind::OpenAi);
        assert_eq!(
            infer_provider_kind("claude-sonnet-4-5"),
            ProviderKind::Anthropic
        );
        assert_eq!(
            infer_provider_kind("models/gemini-2.0-flash"),
            ProviderKind::Gemini
        );
        assert_eq!(infer_provider_kind("llama3.2"), ProviderKind::Ollama);
    }

    #[test]
    fn test_explicit_provider_wins() {
        let kind = resolve_provider(Some("ollama"), "gpt-4o-mini").unwrap();
        assert_eq!(kind, ProviderKind::Ollama);
        assert!(resolve_provider(Some("nonsense"), "gpt-4o-mini").is_err());
    }
}
