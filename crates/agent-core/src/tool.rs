//! Tool System
//!
//! Callable tool descriptors merged from local implementations and connected
//! MCP servers. The registry resolves a model-issued tool call to an
//! executable handle; the engine freezes a snapshot per assistant turn so the
//! schemas it advertised stay consistent with what it can dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{AgentError, Result};
use crate::message::ToolCall;
use crate::provider::ToolSchema;

/// Result from tool execution
#[derive(Clone, Debug)]
pub struct ToolResult {
    /// Output text (success payload or failure description)
    pub content: String,

    /// Whether the tool reported a failure
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn failure(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Where a tool came from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolOrigin {
    /// Implemented in-process
    Local,
    /// Hosted by a connected MCP server
    Mcp(String),
}

impl std::fmt::Display for ToolOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolOrigin::Local => write!(f, "local"),
            ToolOrigin::Mcp(server) => write!(f, "mcp:{}", server),
        }
    }
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Advertisement schema for function calling
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with the given JSON argument object
    async fn invoke(&self, arguments: &Value) -> Result<ToolResult>;

    /// Validate arguments against the schema's `required` list before execution
    fn validate(&self, arguments: &Value) -> Result<()> {
        let schema = self.schema();
        let required = schema
            .parameters
            .get("required")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for key in required.iter().filter_map(Value::as_str) {
            if arguments.get(key).is_none() {
                return Err(AgentError::InvalidArguments(format!(
                    "missing required parameter: {}",
                    key
                )));
            }
        }
        Ok(())
    }
}

/// A registered tool: schema, origin, and the executable handle
#[derive(Clone)]
pub struct ToolDescriptor {
    pub schema: ToolSchema,
    pub origin: ToolOrigin,
    pub handler: Arc<dyn Tool>,
}

/// Registry for callable tools, merged from local and MCP sources.
///
/// Names are unique across sources; registering a duplicate is rejected and
/// leaves the registry unchanged.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a local tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_with_origin(Arc::new(tool), ToolOrigin::Local)
    }

    /// Register a tool handle with an explicit origin
    pub fn register_with_origin(
        &mut self,
        handler: Arc<dyn Tool>,
        origin: ToolOrigin,
    ) -> Result<()> {
        let schema = handler.schema();
        if self.tools.contains_key(&schema.name) {
            return Err(AgentError::DuplicateTool(schema.name));
        }
        tracing::debug!(tool = %schema.name, origin = %origin, "registered tool");
        self.tools.insert(
            schema.name.clone(),
            ToolDescriptor {
                schema,
                origin,
                handler,
            },
        );
        Ok(())
    }

    /// Look up a tool by name
    pub fn resolve(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    /// All advertised schemas
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|d| d.schema.clone()).collect()
    }

    /// Registered tool names
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Freeze the current tool set for one assistant turn. Tools registered
    /// after the snapshot (e.g. by a reconnecting server) are not visible
    /// until the next turn.
    pub fn snapshot(&self) -> ToolSnapshot {
        ToolSnapshot {
            tools: self.tools.clone(),
        }
    }
}

/// Frozen view of the registry for a single assistant turn
#[derive(Clone)]
pub struct ToolSnapshot {
    tools: HashMap<String, ToolDescriptor>,
}

impl ToolSnapshot {
    /// Schemas to advertise for this turn
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|d| d.schema.clone()).collect()
    }

    /// Execute a tool call against the frozen set
    pub async fn invoke(&self, call: &ToolCall) -> Result<ToolResult> {
        let descriptor = self
            .tools
            .get(&call.name)
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;

        descriptor.handler.validate(&call.arguments)?;
        descriptor.handler.invoke(&call.arguments).await
    }
}

// ============================================================================
// Built-in Tools
// ============================================================================

/// Returns the current date and time
pub struct DateTimeTool;

#[async_trait]
impl Tool for DateTimeTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "datetime",
            "Get the current date and time",
            json!({
                "type": "object",
                "properties": {
                    "format": {
                        "type": "string",
                        "description": "Output format",
                        "enum": ["iso", "human", "unix"]
                    }
                }
            }),
        )
    }

    async fn invoke(&self, arguments: &Value) -> Result<ToolResult> {
        let format = arguments
            .get("format")
            .and_then(Value::as_str)
            .unwrap_or("human");

        let now = chrono::Utc::now();
        let output = match format {
            "iso" => now.to_rfc3339(),
            "unix" => now.timestamp().to_string(),
            _ => now.format("%A, %B %d, %Y at %H:%M:%S UTC").to_string(),
        };

        Ok(ToolResult::success(output))
    }
}

/// Evaluates arithmetic expressions
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "calculate",
            "Evaluate an arithmetic expression with +, -, *, /, ^ and parentheses",
            json!({
                "type": "object",
                "properties": {
                    "expression": {
                        "type": "string",
                        "description": "Expression to evaluate, e.g. '2 + 2' or '(3 + 4) * 5'"
                    }
                },
                "required": ["expression"]
            }),
        )
    }

    async fn invoke(&self, arguments: &Value) -> Result<ToolResult> {
        let expr = arguments
            .get("expression")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::InvalidArguments("missing expression".into()))?;

        match eval_expression(expr) {
            Ok(value) => Ok(ToolResult::success(format!("{} = {}", expr.trim(), value))),
            Err(reason) => Ok(ToolResult::failure(reason)),
        }
    }
}

/// Recursive-descent evaluator over a token cursor. Precedence, lowest to
/// highest: additive, multiplicative, power (right-associative), unary minus.
fn eval_expression(input: &str) -> std::result::Result<f64, String> {
    let tokens: Vec<char> = input.chars().filter(|c| !c.is_whitespace()).collect();
    let mut pos = 0usize;
    let value = parse_additive(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(format!("unexpected input at position {}", pos));
    }
    Ok(value)
}

fn parse_additive(tokens: &[char], pos: &mut usize) -> std::result::Result<f64, String> {
    let mut value = parse_multiplicative(tokens, pos)?;
    while let Some(&op) = tokens.get(*pos) {
        if op != '+' && op != '-' {
            break;
        }
        *pos += 1;
        let rhs = parse_multiplicative(tokens, pos)?;
        value = if op == '+' { value + rhs } else { value - rhs };
    }
    Ok(value)
}

fn parse_multiplicative(tokens: &[char], pos: &mut usize) -> std::result::Result<f64, String> {
    let mut value = parse_power(tokens, pos)?;
    while let Some(&op) = tokens.get(*pos) {
        if op != '*' && op != '/' {
            break;
        }
        *pos += 1;
        let rhs = parse_power(tokens, pos)?;
        if op == '/' {
            if rhs == 0.0 {
                return Err("division by zero".into());
            }
            value /= rhs;
        } else {
            value *= rhs;
        }
    }
    Ok(value)
}

fn parse_power(tokens: &[char], pos: &mut usize) -> std::result::Result<f64, String> {
    let base = parse_unary(tokens, pos)?;
    if tokens.get(*pos) == Some(&'^') {
        *pos += 1;
        let exponent = parse_power(tokens, pos)?;
        return Ok(base.powf(exponent));
    }
    Ok(base)
}

fn parse_unary(tokens: &[char], pos: &mut usize) -> std::result::Result<f64, String> {
    if tokens.get(*pos) == Some(&'-') {
        *pos += 1;
        return Ok(-parse_unary(tokens, pos)?);
    }
    parse_atom(tokens, pos)
}

fn parse_atom(tokens: &[char], pos: &mut usize) -> std::result::Result<f64, String> {
    match tokens.get(*pos) {
        Some('(') => {
            *pos += 1;
            let value = parse_additive(tokens, pos)?;
            if tokens.get(*pos) != Some(&')') {
                return Err("unbalanced parentheses".into());
            }
            *pos += 1;
            Ok(value)
        }
        Some(c) if c.is_ascii_digit() || *c == '.' => {
            let start = *pos;
            while tokens
                .get(*pos)
                .is_some_and(|c| c.is_ascii_digit() || *c == '.')
            {
                *pos += 1;
            }
            let literal: String = tokens[start..*pos].iter().collect();
            literal
                .parse::<f64>()
                .map_err(|_| format!("invalid number: {}", literal))
        }
        Some(c) => Err(format!("unexpected character: {}", c)),
        None => Err("unexpected end of expression".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculator_precedence() {
        assert!((eval_expression("2 + 3 * 4").unwrap() - 14.0).abs() < f64::EPSILON);
        assert!((eval_expression("(2 + 3) * 4").unwrap() - 20.0).abs() < f64::EPSILON);
        assert!((eval_expression("2 ^ 8").unwrap() - 256.0).abs() < f64::EPSILON);
        assert!((eval_expression("-3 + 5").unwrap() - 2.0).abs() < f64::EPSILON);
        assert!(eval_expression("1 / 0").is_err());
        assert!(eval_expression("2 +").is_err());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(DateTimeTool).unwrap();
        let before = registry.len();

        let result = registry.register(DateTimeTool);
        assert!(matches!(result, Err(AgentError::DuplicateTool(name)) if name == "datetime"));
        assert_eq!(registry.len(), before);
    }

    #[test]
    fn test_duplicate_rejected_across_origins() {
        let mut registry = ToolRegistry::new();
        registry.register(CalculatorTool).unwrap();

        let result = registry
            .register_with_origin(Arc::new(CalculatorTool), ToolOrigin::Mcp("demo".into()));
        assert!(result.is_err());
        assert_eq!(registry.resolve("calculate").unwrap().origin, ToolOrigin::Local);
    }

    #[tokio::test]
    async fn test_snapshot_invoke_unknown_tool() {
        let registry = ToolRegistry::new();
        let snapshot = registry.snapshot();
        let call = ToolCall::new("c1", "nope", json!({}));
        assert!(matches!(
            snapshot.invoke(&call).await,
            Err(AgentError::ToolNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_is_frozen() {
        let mut registry = ToolRegistry::new();
        registry.register(DateTimeTool).unwrap();
        let snapshot = registry.snapshot();

        registry.register(CalculatorTool).unwrap();
        assert_eq!(snapshot.schemas().len(), 1);
        assert_eq!(registry.schemas().len(), 2);
    }

    #[tokio::test]
    async fn test_validate_missing_required() {
        let mut registry = ToolRegistry::new();
        registry.register(CalculatorTool).unwrap();
        let snapshot = registry.snapshot();

        let call = ToolCall::new("c1", "calculate", json!({}));
        assert!(matches!(
            snapshot.invoke(&call).await,
            Err(AgentError::InvalidArguments(_))
        ));
    }
}
