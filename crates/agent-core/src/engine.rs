//! Agent Execution Engine
//!
//! Drives one goal-directed run as a bounded state machine over a
//! [`Conversation`] and a [`ToolRegistry`]. Four strategies share the same
//! turn and tool-dispatch machinery:
//!
//! | Type     | Pattern                                             |
//! |----------|-----------------------------------------------------|
//! | simple   | Act, Act, ... until done                            |
//! | react    | Reason before every Act                             |
//! | planner  | one Plan turn, then Act, Act, ...                   |
//! | hybrid   | one Plan turn, then Reason before every Act         |
//!
//! Only Act turns (a reply carrying at least one tool call that gets
//! executed) count against the step limit; Plan and Reason turns each cost a
//! provider call but are unbounded in number.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::conversation::Conversation;
use crate::error::{AgentError, Result};
use crate::message::ToolCall;
use crate::provider::{LlmProvider, NormalizedReply, ToolSchema};
use crate::tool::{Tool, ToolOrigin, ToolRegistry, ToolResult, ToolSnapshot};

/// Acts allowed per run unless overridden
pub const DEFAULT_STEP_LIMIT: usize = 15;

/// Consecutive no-tool-call, no-completion replies tolerated in an Act phase
const MAX_ACT_ATTEMPTS: usize = 3;

/// Marker the model is instructed to emit when the goal is met
const COMPLETION_MARKER: &str = "goal complete";

const PLAN_PROMPT: &str = "Create a plan for achieving the goal. Do NOT call any tools in this \
                           step - only provide a text-based plan.";
const REASON_PROMPT: &str = "Think about your next action. Do NOT call any tools in this step - \
                             only provide your reasoning in text.";
const ACT_PROMPT: &str = "Perform the next action toward the goal by calling a tool. If the goal \
                          is already fully achieved, do not call any tools and reply with the \
                          phrase GOAL COMPLETE.";
const REJECT_PROMPT: &str = "Response rejected: you MUST either call a tool or declare GOAL \
                             COMPLETE. Please try again.";

/// Reasoning strategy selector
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Simple,
    React,
    Planner,
    Hybrid,
}

impl AgentType {
    fn plans(self) -> bool {
        matches!(self, AgentType::Planner | AgentType::Hybrid)
    }

    fn reasons(self) -> bool {
        matches!(self, AgentType::React | AgentType::Hybrid)
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentType::Simple => write!(f, "simple"),
            AgentType::React => write!(f, "react"),
            AgentType::Planner => write!(f, "planner"),
            AgentType::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl FromStr for AgentType {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "simple" => Ok(AgentType::Simple),
            "react" => Ok(AgentType::React),
            "planner" => Ok(AgentType::Planner),
            "hybrid" => Ok(AgentType::Hybrid),
            other => Err(AgentError::Config(format!(
                "Unknown agent type: {} (must be one of 'react', 'planner', 'hybrid', 'simple')",
                other
            ))),
        }
    }
}

/// Terminal and in-flight run states
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentStatus {
    Running,
    Succeeded,
    Failed,
    StepLimitExceeded,
}

/// Outcome record for one `run(goal)` invocation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: Uuid,
    pub agent_type: AgentType,
    pub goal: String,
    /// Act turns performed so far
    pub steps: usize,
    pub step_limit: usize,
    pub status: AgentStatus,
    /// Final assistant text on success, failure reason otherwise
    pub summary: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl AgentRun {
    fn new(agent_type: AgentType, goal: String, step_limit: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_type,
            goal,
            steps: 0,
            step_limit,
            status: AgentStatus::Running,
            summary: String::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Resource whose lifetime is tied to an [`Agent`], released on `close()`
/// (e.g. an MCP client session)
#[async_trait]
pub trait AsyncResource: Send + Sync {
    async fn close(&self);
}

/// Cloneable handle that aborts a running agent at its next suspension point
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Resolves when cancellation is requested; pends forever otherwise.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
    // Sender dropped without cancelling: this run can no longer be cancelled.
    std::future::pending::<()>().await;
}

/// The agent execution engine. Owns one conversation and one tool registry,
/// and drives exactly one run at a time.
pub struct Agent {
    conversation: Conversation,
    tools: ToolRegistry,
    agent_type: AgentType,
    step_limit: usize,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
    resources: Vec<Arc<dyn AsyncResource>>,
    closed: bool,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    /// Handle for aborting this agent's current run from another task
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel_tx),
        }
    }

    /// Drive the state machine to a terminal state and return the completed
    /// run. All termination paths, including provider and tool failures, are
    /// reported through the run's status and summary.
    pub async fn run(&mut self, goal: impl Into<String>) -> AgentRun {
        let goal = goal.into();
        let mut run = AgentRun::new(self.agent_type, goal.clone(), self.step_limit);

        tracing::info!(
            agent_type = %self.agent_type,
            step_limit = self.step_limit,
            "starting agent run"
        );

        if let Err(err) = self.drive(&mut run, &goal).await {
            tracing::warn!(%err, steps = run.steps, "agent run failed");
            run.status = AgentStatus::Failed;
            run.summary = err.to_string();
        }

        run.finished_at = Some(Utc::now());
        tracing::info!(status = ?run.status, steps = run.steps, "agent run finished");
        run
    }

    async fn drive(&mut self, run: &mut AgentRun, goal: &str) -> Result<()> {
        self.conversation.push_user(format!("Your goal is: {}", goal));

        if self.agent_type.plans() {
            tracing::debug!("plan turn");
            self.generate(PLAN_PROMPT, &[]).await?;
        }

        loop {
            if self.agent_type.reasons() {
                tracing::debug!("reason turn");
                self.generate(REASON_PROMPT, &[]).await?;
            }

            // Freeze the registry for this turn so the schemas we advertise
            // match what we can dispatch.
            let snapshot = self.tools.snapshot();
            let schemas = snapshot.schemas();

            let reply = self.act_reply(&schemas).await?;

            if reply.tool_calls.is_empty() {
                run.status = AgentStatus::Succeeded;
                run.summary = reply.text.trim().to_string();
                return Ok(());
            }

            if run.steps >= run.step_limit {
                tracing::warn!(
                    steps = run.steps,
                    "step limit reached; aborting tool execution"
                );
                run.status = AgentStatus::StepLimitExceeded;
                run.summary = format!(
                    "Step limit of {} reached before the goal was met",
                    run.step_limit
                );
                return Ok(());
            }

            run.steps += 1;
            for call in &reply.tool_calls {
                tracing::debug!(tool = %call.name, id = %call.id, "executing tool call");
                let result = self.execute_call(&snapshot, call).await?;
                self.conversation.push_tool_result(call, &result);
            }
        }
    }

    /// One Act phase: prompt for an action, re-prompting a bounded number of
    /// times when the model neither calls a tool nor declares completion.
    async fn act_reply(&mut self, schemas: &[ToolSchema]) -> Result<NormalizedReply> {
        let mut prompt = ACT_PROMPT;
        for attempt in 1..=MAX_ACT_ATTEMPTS {
            let reply = self.generate(prompt, schemas).await?;
            if !reply.tool_calls.is_empty() || is_completion(&reply) {
                return Ok(reply);
            }
            tracing::warn!(attempt, "assistant neither called a tool nor declared completion");
            prompt = REJECT_PROMPT;
        }
        Err(AgentError::NoActionTaken(MAX_ACT_ATTEMPTS))
    }

    /// Provider turn, abortable at the suspension point
    async fn generate(&mut self, prompt: &str, schemas: &[ToolSchema]) -> Result<NormalizedReply> {
        let mut cancel = self.cancel_rx.clone();
        tokio::select! {
            biased;
            () = cancelled(&mut cancel) => Err(AgentError::Cancelled),
            reply = self.conversation.generate_response(prompt, schemas) => reply,
        }
    }

    /// Tool dispatch, abortable at the suspension point. Tool failures are
    /// folded into an error-flagged result so the model can react to them;
    /// they never terminate the run here.
    async fn execute_call(&mut self, snapshot: &ToolSnapshot, call: &ToolCall) -> Result<ToolResult> {
        let mut cancel = self.cancel_rx.clone();
        let outcome = tokio::select! {
            biased;
            () = cancelled(&mut cancel) => return Err(AgentError::Cancelled),
            outcome = snapshot.invoke(call) => outcome,
        };

        Ok(match outcome {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(tool = %call.name, %err, "tool invocation failed");
                ToolResult::failure(err.to_string())
            }
        })
    }

    /// Release the owned conversation and every attached resource. Safe to
    /// call multiple times; nothing is released twice.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.conversation.close();
        for resource in &self.resources {
            resource.close().await;
        }
    }
}

fn is_completion(reply: &NormalizedReply) -> bool {
    reply.tool_calls.is_empty() && reply.text.to_lowercase().contains(COMPLETION_MARKER)
}

/// Builder for [`Agent`]
pub struct AgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    model: Option<String>,
    system_prompt: Option<String>,
    agent_type: AgentType,
    step_limit: usize,
    registry: ToolRegistry,
    pending_tools: Vec<Arc<dyn Tool>>,
    resources: Vec<Arc<dyn AsyncResource>>,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            model: None,
            system_prompt: None,
            agent_type: AgentType::React,
            step_limit: DEFAULT_STEP_LIMIT,
            registry: ToolRegistry::new(),
            pending_tools: Vec::new(),
            resources: Vec::new(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn agent_type(mut self, agent_type: AgentType) -> Self {
        self.agent_type = agent_type;
        self
    }

    pub fn step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    /// Replace the registry wholesale (e.g. one pre-merged with MCP tools)
    pub fn tools(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Queue a local tool; duplicates are rejected at build time
    pub fn tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.pending_tools.push(Arc::new(tool));
        self
    }

    /// Attach a resource to release when the agent closes
    pub fn resource(mut self, resource: Arc<dyn AsyncResource>) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn build(self) -> Result<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;
        let model = self
            .model
            .ok_or_else(|| AgentError::Config("Model is required".into()))?;

        let mut registry = self.registry;
        for tool in self.pending_tools {
            registry.register_with_origin(tool, ToolOrigin::Local)?;
        }

        let conversation = match self.system_prompt {
            Some(prompt) => Conversation::with_system_prompt(provider, model, prompt),
            None => Conversation::new(provider, model),
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);

        Ok(Agent {
            conversation,
            tools: registry,
            agent_type: self.agent_type,
            step_limit: self.step_limit,
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
            resources: self.resources,
            closed: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, Role};
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider double that replays a fixed sequence of turns and records
    /// how many tool schemas each turn advertised.
    #[derive(Debug)]
    struct ScriptedProvider {
        turns: Mutex<VecDeque<Result<NormalizedReply>>>,
        advertised: Mutex<Vec<usize>>,
    }

    impl ScriptedProvider {
        fn new(turns: Vec<Result<NormalizedReply>>) -> Arc<Self> {
            Arc::new(Self {
                turns: Mutex::new(turns.into()),
                advertised: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(
            &self,
            _messages: &[Message],
            tools: &[ToolSchema],
            _model: &str,
        ) -> Result<NormalizedReply> {
            self.advertised.lock().unwrap().push(tools.len());
            self.turns
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(NormalizedReply::text_only("script exhausted")))
        }

        async fn list_models(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
    }

    /// Provider whose send never resolves, for cancellation tests
    #[derive(Debug)]
    struct StalledProvider;

    #[async_trait]
    impl LlmProvider for StalledProvider {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn send(
            &self,
            _messages: &[Message],
            _tools: &[ToolSchema],
            _model: &str,
        ) -> Result<NormalizedReply> {
            std::future::pending().await
        }

        async fn list_models(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema::new("echo", "Echo the input back", json!({"type": "object"}))
        }

        async fn invoke(&self, arguments: &Value) -> Result<ToolResult> {
            Ok(ToolResult::success(arguments.to_string()))
        }
    }

    struct UnavailableTool;

    #[async_trait]
    impl Tool for UnavailableTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema::new("flaky", "Always unavailable", json!({"type": "object"}))
        }

        async fn invoke(&self, _arguments: &Value) -> Result<ToolResult> {
            Err(AgentError::ToolUnavailable("server connection lost".into()))
        }
    }

    fn act(tool: &str) -> Result<NormalizedReply> {
        Ok(NormalizedReply::with_tool_calls(
            "",
            vec![ToolCall::with_generated_id(tool, json!({"input": "x"}))],
        ))
    }

    fn text(content: &str) -> Result<NormalizedReply> {
        Ok(NormalizedReply::text_only(content))
    }

    fn agent_for(
        provider: Arc<dyn LlmProvider>,
        agent_type: AgentType,
        step_limit: usize,
    ) -> Agent {
        Agent::builder()
            .provider(provider)
            .model("test-model")
            .agent_type(agent_type)
            .step_limit(step_limit)
            .tool(EchoTool)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_simple_counts_acts_and_succeeds() {
        let provider = ScriptedProvider::new(vec![
            act("echo"),
            act("echo"),
            act("echo"),
            text("All files written. GOAL COMPLETE."),
        ]);
        let mut agent = agent_for(provider, AgentType::Simple, 3);

        let run = agent.run("write X then stop").await;
        assert_eq!(run.status, AgentStatus::Succeeded);
        assert_eq!(run.steps, 3);
        assert!(run.summary.contains("GOAL COMPLETE"));
        assert!(agent.conversation().history().tool_correlation_ok());
        agent.close().await;
    }

    #[tokio::test]
    async fn test_react_exceeds_step_limit() {
        let provider = ScriptedProvider::new(vec![
            text("thinking"),
            act("echo"),
            text("thinking"),
            act("echo"),
            text("thinking"),
            act("echo"), // would be act 3; limit is 2
        ]);
        let mut agent = agent_for(provider.clone(), AgentType::React, 2);

        let run = agent.run("never finishes").await;
        assert_eq!(run.status, AgentStatus::StepLimitExceeded);
        assert_eq!(run.steps, 2);

        // Reason turns advertise no tools; act turns advertise the snapshot.
        let advertised = provider.advertised.lock().unwrap().clone();
        assert_eq!(advertised, vec![0, 1, 0, 1, 0, 1]);
        agent.close().await;
    }

    #[tokio::test]
    async fn test_planner_plans_exactly_once() {
        let provider = ScriptedProvider::new(vec![
            text("the plan: do things"),
            act("echo"),
            act("echo"),
            text("GOAL COMPLETE"),
        ]);
        let mut agent = agent_for(provider.clone(), AgentType::Planner, 10);

        let run = agent.run("do things").await;
        assert_eq!(run.status, AgentStatus::Succeeded);
        assert_eq!(run.steps, 2);

        let plan_turns = agent
            .conversation()
            .messages()
            .iter()
            .filter(|m| m.role == Role::User && m.content.contains("Create a plan"))
            .count();
        assert_eq!(plan_turns, 1);

        // Plan turn is the only zero-tool call besides none: acts carry tools.
        let advertised = provider.advertised.lock().unwrap().clone();
        assert_eq!(advertised, vec![0, 1, 1, 1]);
        agent.close().await;
    }

    #[tokio::test]
    async fn test_hybrid_plans_then_interleaves() {
        let provider = ScriptedProvider::new(vec![
            text("the plan"),
            text("reasoning"),
            act("echo"),
            text("reasoning"),
            text("GOAL COMPLETE"),
        ]);
        let mut agent = agent_for(provider, AgentType::Hybrid, 10);

        let run = agent.run("goal").await;
        assert_eq!(run.status, AgentStatus::Succeeded);
        assert_eq!(run.steps, 1);
        agent.close().await;
    }

    #[tokio::test]
    async fn test_nonretryable_failure_on_first_turn() {
        let provider =
            ScriptedProvider::new(vec![Err(AgentError::Auth("invalid api key".into()))]);
        let mut agent = agent_for(provider, AgentType::Simple, 5);

        let run = agent.run("goal").await;
        assert_eq!(run.status, AgentStatus::Failed);
        assert_eq!(run.steps, 0);
        assert!(run.summary.contains("Authentication"));
        agent.close().await;
    }

    #[tokio::test]
    async fn test_tool_unavailable_is_folded_not_fatal() {
        let provider = ScriptedProvider::new(vec![
            text("thinking"),
            Ok(NormalizedReply::with_tool_calls(
                "",
                vec![ToolCall::new("c1", "flaky", json!({}))],
            )),
            text("thinking"),
            text("GOAL COMPLETE"),
        ]);
        let mut agent = Agent::builder()
            .provider(provider)
            .model("test-model")
            .agent_type(AgentType::React)
            .tool(UnavailableTool)
            .build()
            .unwrap();

        let run = agent.run("goal").await;
        assert_eq!(run.status, AgentStatus::Succeeded);
        assert_eq!(run.steps, 1);

        let folded = agent
            .conversation()
            .messages()
            .iter()
            .find(|m| m.role == Role::Tool)
            .expect("tool failure should be folded into history");
        assert!(folded.content.contains("unavailable"));
        assert_eq!(folded.tool_call_id.as_deref(), Some("c1"));
        agent.close().await;
    }

    #[tokio::test]
    async fn test_refusal_to_act_fails_after_retries() {
        let provider = ScriptedProvider::new(vec![
            text("I would rather chat"),
            text("still chatting"),
            text("no tools for me"),
        ]);
        let mut agent = agent_for(provider.clone(), AgentType::Simple, 5);

        let run = agent.run("goal").await;
        assert_eq!(run.status, AgentStatus::Failed);
        assert_eq!(run.steps, 0);
        assert!(run.summary.contains("no tool call"));
        assert_eq!(provider.advertised.lock().unwrap().len(), 3);
        agent.close().await;
    }

    #[tokio::test]
    async fn test_cancellation_aborts_at_suspension_point() {
        let mut agent = agent_for(Arc::new(StalledProvider), AgentType::Simple, 5);
        let handle = agent.cancel_handle();

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            handle.cancel();
        });

        let run = agent.run("goal").await;
        assert_eq!(run.status, AgentStatus::Failed);
        assert!(run.summary.to_lowercase().contains("cancel"));
        agent.close().await;
    }

    #[tokio::test]
    async fn test_close_releases_resources_once() {
        struct CountingResource(AtomicUsize);

        #[async_trait]
        impl AsyncResource for CountingResource {
            async fn close(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let resource = Arc::new(CountingResource(AtomicUsize::new(0)));
        let mut agent = Agent::builder()
            .provider(ScriptedProvider::new(vec![]))
            .model("test-model")
            .resource(resource.clone())
            .build()
            .unwrap();

        agent.close().await;
        agent.close().await;
        assert_eq!(resource.0.load(Ordering::SeqCst), 1);
        assert!(agent.conversation().is_closed());
    }

    #[test]
    fn test_agent_type_parsing() {
        assert_eq!("react".parse::<AgentType>().unwrap(), AgentType::React);
        assert_eq!("HYBRID".parse::<AgentType>().unwrap(), AgentType::Hybrid);
        assert!("autonomous".parse::<AgentType>().is_err());
    }
}
