//! Registry adapter for MCP-hosted tools

use agent_core::{Result, Tool, ToolOrigin, ToolRegistry, ToolResult, ToolSchema};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::client::{McpClient, McpToolInfo};

/// One server-hosted tool exposed through the `Tool` trait
pub struct McpTool {
    client: McpClient,
    info: McpToolInfo,
}

impl McpTool {
    pub fn new(client: McpClient, info: McpToolInfo) -> Self {
        Self { client, info }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            &self.info.name,
            &self.info.description,
            self.info.input_schema.clone(),
        )
    }

    async fn invoke(&self, arguments: &Value) -> Result<ToolResult> {
        let outcome = self
            .client
            .call_tool(&self.info.name, arguments.clone())
            .await?;
        Ok(extract_result(&outcome))
    }
}

/// Flatten an MCP call result into a text payload, honoring the `isError`
/// flag. Non-text content falls back to raw JSON.
fn extract_result(outcome: &Value) -> ToolResult {
    let is_error = outcome
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let text = outcome
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    let content = if text.is_empty() {
        outcome.to_string()
    } else {
        text
    };

    if is_error {
        ToolResult::failure(content)
    } else {
        ToolResult::success(content)
    }
}

/// Merge the client's cached tools into the registry under its server id.
/// Duplicate names are rejected by the registry, not overwritten.
pub async fn register_tools(registry: &mut ToolRegistry, client: &McpClient) -> Result<usize> {
    let origin = ToolOrigin::Mcp(client.server_id().to_string());
    let tools = client.tools().await;
    let count = tools.len();

    for info in tools {
        registry.register_with_origin(
            Arc::new(McpTool::new(client.clone(), info)),
            origin.clone(),
        )?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_text_content() {
        let outcome = json!({
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "text", "text": "line two"}
            ],
            "isError": false
        });
        let result = extract_result(&outcome);
        assert!(!result.is_error);
        assert_eq!(result.content, "line one\nline two");
    }

    #[test]
    fn test_extract_honors_error_flag() {
        let outcome = json!({
            "content": [{"type": "text", "text": "file not found"}],
            "isError": true
        });
        let result = extract_result(&outcome);
        assert!(result.is_error);
        assert_eq!(result.content, "file not found");
    }

    #[test]
    fn test_extract_falls_back_to_raw_json() {
        let outcome = json!({"structuredContent": {"value": 7}});
        let result = extract_result(&outcome);
        assert!(!result.is_error);
        assert!(result.content.contains("structuredContent"));
    }
}
