//! MCP Client
//!
//! Maintains a stdio session to one MCP server process: spawn, JSON-RPC
//! initialize handshake, tool listing, and invocation round trips correlated
//! by request id. Requests from concurrent runs share the pending map and
//! cannot cross-correlate.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tracing::{debug, warn};

use crate::error::{McpError, Result};

const PROTOCOL_VERSION: &str = "2025-06-18";
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// How to launch an MCP server process
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerSpec {
    /// Stable identifier used in tool origins (`mcp:<id>`)
    pub id: String,

    pub command: String,
    pub args: Vec<String>,
}

impl ServerSpec {
    /// Interpret a caller-supplied locator: `.py` paths run under `python`,
    /// `.js` paths under `node`, anything else is the command itself.
    pub fn parse(locator: &str) -> Self {
        let stem = |path: &str| {
            std::path::Path::new(path)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string())
        };

        if locator.ends_with(".py") {
            Self {
                id: stem(locator),
                command: "python".into(),
                args: vec![locator.to_string()],
            }
        } else if locator.ends_with(".js") {
            Self {
                id: stem(locator),
                command: "node".into(),
                args: vec![locator.to_string()],
            }
        } else {
            Self {
                id: stem(locator),
                command: locator.to_string(),
                args: Vec::new(),
            }
        }
    }
}

/// Tool metadata published by the server during the handshake
#[derive(Clone, Debug)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value>>>;

/// Cloneable handle to one MCP server session
#[derive(Clone)]
pub struct McpClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    spec: ServerSpec,
    child: AsyncMutex<Option<Child>>,
    writer: AsyncMutex<Option<BufWriter<ChildStdin>>>,
    pending: AsyncMutex<PendingMap>,
    next_id: AtomicU64,
    tools: AsyncMutex<Vec<McpToolInfo>>,
    closed: AtomicBool,
}

impl McpClient {
    /// Spawn the server, run the capability handshake, and cache its tools.
    pub async fn connect(spec: ServerSpec) -> Result<Self> {
        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| McpError::Spawn {
            server: spec.id.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or_else(|| McpError::Transport {
            server: spec.id.clone(),
            message: "failed to capture server stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::Transport {
            server: spec.id.clone(),
            message: "failed to capture server stdout".into(),
        })?;

        let client = Self {
            inner: Arc::new(ClientInner {
                spec,
                child: AsyncMutex::new(Some(child)),
                writer: AsyncMutex::new(Some(BufWriter::new(stdin))),
                pending: AsyncMutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                tools: AsyncMutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        };

        let reader = Arc::clone(&client.inner);
        tokio::spawn(async move {
            reader.reader_loop(stdout).await;
        });

        match client.handshake().await {
            Ok(()) => Ok(client),
            Err(err) => {
                client.close().await;
                Err(err)
            }
        }
    }

    pub fn server_id(&self) -> &str {
        &self.inner.spec.id
    }

    async fn handshake(&self) -> Result<()> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {}
        });
        self.inner
            .send_request("initialize", params, HANDSHAKE_TIMEOUT)
            .await?;
        self.inner
            .send_notification("notifications/initialized", json!({}))
            .await?;

        let listing = self
            .inner
            .send_request("tools/list", json!({}), HANDSHAKE_TIMEOUT)
            .await?;
        let mut tools = self.inner.tools.lock().await;
        *tools = parse_tool_listing(&listing);
        debug!(
            server = %self.inner.spec.id,
            count = tools.len(),
            "listed MCP server tools"
        );
        Ok(())
    }

    /// Tools published by the server at handshake time
    pub async fn tools(&self) -> Vec<McpToolInfo> {
        self.inner.tools.lock().await.clone()
    }

    /// One invocation round trip, keyed by request id
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(McpError::Terminated {
                server: self.inner.spec.id.clone(),
            });
        }
        let params = json!({
            "name": name,
            "arguments": match arguments {
                Value::Null => json!({}),
                other => other,
            }
        });
        self.inner
            .send_request("tools/call", params, CALL_TIMEOUT)
            .await
    }

    /// Kill the server process and fail outstanding calls. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown().await;
    }
}

#[async_trait::async_trait]
impl agent_core::AsyncResource for McpClient {
    async fn close(&self) {
        McpClient::close(self).await;
    }
}

impl ClientInner {
    async fn send_request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });
        if let Err(err) = self.write_message(&payload).await {
            self.pending.lock().await.remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::Terminated {
                server: self.spec.id.clone(),
            }),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(McpError::Timeout {
                    server: self.spec.id.clone(),
                    seconds: timeout.as_secs(),
                })
            }
        }
    }

    async fn send_notification(&self, method: &str, params: Value) -> Result<()> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        });
        self.write_message(&payload).await
    }

    async fn send_response(&self, id: Value, body: Value, is_error: bool) -> Result<()> {
        let key = if is_error { "error" } else { "result" };
        let mut payload = json!({"jsonrpc": "2.0", "id": id});
        payload[key] = body;
        self.write_message(&payload).await
    }

    async fn write_message(&self, message: &Value) -> Result<()> {
        let encoded = serde_json::to_string(message).map_err(|source| McpError::InvalidJson {
            server: self.spec.id.clone(),
            source,
        })?;

        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or_else(|| McpError::Terminated {
            server: self.spec.id.clone(),
        })?;

        let io_err = |source: std::io::Error| McpError::Transport {
            server: self.spec.id.clone(),
            message: source.to_string(),
        };
        stream.write_all(encoded.as_bytes()).await.map_err(io_err)?;
        stream.write_all(b"\n").await.map_err(io_err)?;
        stream.flush().await.map_err(io_err)?;
        Ok(())
    }

    async fn reader_loop(self: Arc<Self>, stdout: ChildStdout) {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(raw)) = lines.next_line().await {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => self.route_inbound(value).await,
                Err(source) => {
                    warn!(
                        server = %self.spec.id,
                        line = trimmed,
                        %source,
                        "ignoring invalid JSON from MCP server"
                    );
                }
            }
        }

        // Server went away: fail whatever is still waiting.
        debug!(server = %self.spec.id, "MCP server stdout closed");
        self.shutdown().await;
    }

    async fn route_inbound(&self, value: Value) {
        match (value.get("id").cloned(), value.get("method").is_some()) {
            (Some(id), false) => self.resolve_response(&id, value).await,
            (Some(id), true) => self.answer_server_request(id, &value).await,
            (None, _) => {
                debug!(
                    server = %self.spec.id,
                    method = value.get("method").and_then(|v| v.as_str()).unwrap_or("?"),
                    "ignoring server notification"
                );
            }
        }
    }

    async fn resolve_response(&self, id: &Value, value: Value) {
        let Some(key) = id.as_u64() else {
            warn!(server = %self.spec.id, "response with non-numeric id");
            return;
        };

        let sender = self.pending.lock().await.remove(&key);
        let Some(sender) = sender else {
            debug!(server = %self.spec.id, response_id = key, "response for unknown request");
            return;
        };

        let outcome = if let Some(error) = value.get("error") {
            Err(McpError::Rpc {
                server: self.spec.id.clone(),
                code: error.get("code").and_then(Value::as_i64).unwrap_or(-32000),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            })
        } else {
            Ok(value.get("result").cloned().unwrap_or(Value::Null))
        };
        let _ = sender.send(outcome);
    }

    async fn answer_server_request(&self, id: Value, value: &Value) {
        let method = value.get("method").and_then(Value::as_str).unwrap_or("");
        let outcome = if method == "ping" {
            self.send_response(id, json!({}), false).await
        } else {
            warn!(server = %self.spec.id, method, "server sent unsupported request");
            let error = json!({
                "code": -32601,
                "message": format!("client does not implement method '{}'", method),
            });
            self.send_response(id, error, true).await
        };
        if let Err(err) = outcome {
            warn!(server = %self.spec.id, %err, "failed to answer server request");
        }
    }

    async fn shutdown(&self) {
        {
            let mut writer = self.writer.lock().await;
            *writer = None;
        }

        {
            let mut child = self.child.lock().await;
            if let Some(mut running) = child.take() {
                if let Err(err) = running.kill().await {
                    debug!(
                        server = %self.spec.id,
                        %err,
                        "failed to kill MCP server process (may have already exited)"
                    );
                }
                let _ = running.wait().await;
            }
        }

        let mut pending = self.pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(McpError::Terminated {
                server: self.spec.id.clone(),
            }));
        }
    }
}

fn parse_tool_listing(result: &Value) -> Vec<McpToolInfo> {
    result
        .get("tools")
        .and_then(Value::as_array)
        .map(|tools| {
            tools
                .iter()
                .filter_map(|tool| {
                    let name = tool.get("name").and_then(Value::as_str)?;
                    Some(McpToolInfo {
                        name: name.to_string(),
                        description: tool
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        input_schema: tool
                            .get("inputSchema")
                            .cloned()
                            .unwrap_or_else(|| json!({"type": "object"})),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_spec_parsing() {
        let spec = ServerSpec::parse("examples/weather_server.py");
        assert_eq!(spec.command, "python");
        assert_eq!(spec.args, ["examples/weather_server.py"]);
        assert_eq!(spec.id, "weather_server");

        let spec = ServerSpec::parse("servers/files.js");
        assert_eq!(spec.command, "node");
        assert_eq!(spec.id, "files");

        let spec = ServerSpec::parse("mcp-filesystem");
        assert_eq!(spec.command, "mcp-filesystem");
        assert!(spec.args.is_empty());
        assert_eq!(spec.id, "mcp-filesystem");
    }

    #[test]
    fn test_tool_listing_parsing() {
        let listing = json!({
            "tools": [
                {"name": "add", "description": "Add numbers", "inputSchema": {"type": "object"}},
                {"name": "bare"},
                {"description": "nameless, skipped"}
            ]
        });
        let tools = parse_tool_listing(&listing);
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "add");
        assert_eq!(tools[1].description, "");
        assert_eq!(tools[1].input_schema, json!({"type": "object"}));
    }

    /// End-to-end round trip against a scripted stdio server. The fake
    /// server relies on request ids being assigned 1, 2, 3 in order.
    #[tokio::test]
    async fn test_connect_and_call_round_trip() {
        let script = r#"
while IFS= read -r line; do
  case "$line" in
    *'"initialize"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-06-18"}}' ;;
    *'"tools/list"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"greet","description":"Say hello","inputSchema":{"type":"object"}}]}}' ;;
    *'"tools/call"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"hello from mcp"}],"isError":false}}' ;;
  esac
done
"#;
        let path = std::env::temp_dir().join(format!("mcp-fake-{}.sh", std::process::id()));
        std::fs::write(&path, script).unwrap();

        let spec = ServerSpec {
            id: "fake".into(),
            command: "sh".into(),
            args: vec![path.to_string_lossy().into_owned()],
        };

        let client = McpClient::connect(spec).await.unwrap();
        let tools = client.tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "greet");

        let result = client.call_tool("greet", json!({})).await.unwrap();
        assert_eq!(result["content"][0]["text"], "hello from mcp");

        client.close().await;
        client.close().await;

        let err = client.call_tool("greet", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Terminated { .. }));

        let _ = std::fs::remove_file(&path);
    }
}
