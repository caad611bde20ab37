//! Google Gemini Provider
//!
//! generateContent adapter. Gemini does not issue tool-call ids, so the
//! adapter synthesizes deterministic `call_<name>_<idx>` ids; tool results
//! travel back as `functionResponse` parts under the `function` role.

use agent_core::{
    AgentError, LlmProvider, Message, NormalizedReply, Result, Role, StopReason, ToolCall,
    ToolSchema,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::http;
use crate::retry::{self, RetryPolicy};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug)]
pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        }
    }

    async fn send_once(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        model: &str,
    ) -> Result<NormalizedReply> {
        let (system, contents) = to_wire_contents(messages);

        let mut payload = json!({
            "contents": contents,
            "generationConfig": {"temperature": 0}
        });
        if let Some(system) = system {
            payload["system_instruction"] = json!({"parts": [{"text": system}]});
        }
        if !tools.is_empty() {
            payload["tools"] = json!([{"functionDeclarations": to_wire_tools(tools)}]);
        }

        tracing::debug!(
            model,
            messages = messages.len(),
            tools = tools.len(),
            "sending generateContent request"
        );

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );
        let response: GenerateResponse =
            http::send_json("gemini", self.http.post(&url).json(&payload)).await?;

        normalize(response)
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn send(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        model: &str,
    ) -> Result<NormalizedReply> {
        retry::with_backoff(&self.retry, || self.send_once(messages, tools, model)).await
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/v1beta/models?key={}", self.base_url, self.api_key);
        let response: ModelsResponse = http::send_json("gemini", self.http.get(&url)).await?;

        Ok(response
            .models
            .into_iter()
            .map(|m| m.name.trim_start_matches("models/").to_string())
            .collect())
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(rename = "functionCall", default)]
    function_call: Option<FunctionCall>,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Option<Value>,
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    name: String,
}

/// Convert history into Gemini `contents`, pulling system messages out into
/// the system instruction.
fn to_wire_contents(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system: Option<String> = None;
    let mut contents = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => match &mut system {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(&msg.content);
                }
                None => system = Some(msg.content.clone()),
            },
            Role::User => {
                contents.push(json!({"role": "user", "parts": [{"text": msg.content}]}));
            }
            Role::Assistant => {
                let mut parts = Vec::new();
                if !msg.content.is_empty() {
                    parts.push(json!({"text": msg.content}));
                }
                for call in &msg.tool_calls {
                    parts.push(json!({
                        "functionCall": {"name": call.name, "args": call.arguments}
                    }));
                }
                if !parts.is_empty() {
                    contents.push(json!({"role": "model", "parts": parts}));
                }
            }
            Role::Tool => {
                contents.push(json!({
                    "role": "function",
                    "parts": [{
                        "functionResponse": {
                            "name": msg.name.as_deref().unwrap_or("unknown"),
                            "response": {"result": msg.content}
                        }
                    }]
                }));
            }
        }
    }

    (system, contents)
}

fn to_wire_tools(tools: &[ToolSchema]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters
            })
        })
        .collect()
}

fn normalize(response: GenerateResponse) -> Result<NormalizedReply> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| AgentError::MalformedResponse("gemini: reply has no candidates".into()))?;

    let mut text = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if let Some(part_text) = part.text {
            text.push_str(&part_text);
        }
        if let Some(call) = part.function_call {
            let id = format!("call_{}_{}", call.name, tool_calls.len());
            tool_calls.push(ToolCall::new(
                id,
                call.name,
                call.args.unwrap_or_else(|| json!({})),
            ));
        }
    }

    let stop_reason = match candidate.finish_reason.as_deref() {
        _ if !tool_calls.is_empty() => StopReason::ToolUse,
        Some("STOP") | None => StopReason::EndTurn,
        Some("MAX_TOKENS") => StopReason::Length,
        Some(other) => StopReason::Other(other.to_string()),
    };

    Ok(NormalizedReply {
        text,
        tool_calls,
        stop_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_synthesizes_deterministic_ids() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"parts": [
                    {"functionCall": {"name": "add", "args": {"a": 1}}},
                    {"functionCall": {"name": "add", "args": {"a": 2}}}
                ]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();

        let reply = normalize(response).unwrap();
        assert_eq!(reply.tool_calls[0].id, "call_add_0");
        assert_eq!(reply.tool_calls[1].id, "call_add_1");
        assert_eq!(reply.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn test_normalize_joins_text_parts() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"parts": [{"text": "Hello "}, {"text": "world"}]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();

        let reply = normalize(response).unwrap();
        assert_eq!(reply.text, "Hello world");
        assert_eq!(reply.stop_reason, StopReason::EndTurn);
    }

    #[test]
    fn test_normalize_rejects_empty_candidates() {
        let response: GenerateResponse = serde_json::from_value(json!({"candidates": []})).unwrap();
        assert!(matches!(
            normalize(response),
            Err(AgentError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_tool_results_use_function_role() {
        let messages = vec![Message::tool("{\"ok\":true}", "call_add_0", "add")];
        let (_, contents) = to_wire_contents(&messages);

        assert_eq!(contents[0]["role"], "function");
        assert_eq!(contents[0]["parts"][0]["functionResponse"]["name"], "add");
    }

    #[test]
    fn test_system_message_becomes_instruction() {
        let messages = vec![Message::system("be brief"), Message::user("hi")];
        let (system, contents) = to_wire_contents(&messages);
        assert_eq!(system.as_deref(), Some("be brief"));
        assert_eq!(contents.len(), 1);
    }
}
