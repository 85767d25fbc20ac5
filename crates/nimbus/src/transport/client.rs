use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

use super::protocol::{methods, CallToolParams, CallToolResult, ListToolsResult, Request, Response};
use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};
use crate::registry::ToolExecutor;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client half of the tool channel. Spawns the executor as a child process
/// and serializes correlated JSON-RPC requests over its stdin/stdout. One
/// connection for the process's lifetime; the child is killed when the
/// client is dropped.
pub struct ChannelClient {
    channel: Mutex<ChildChannel>,
    request_id: AtomicU64,
    request_timeout: Duration,
}

struct ChildChannel {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl Drop for ChildChannel {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

impl ChannelClient {
    /// Launch the tool server at `server_path` and perform the initialize
    /// handshake. Failure here is fatal to the orchestrator.
    pub async fn connect(server_path: &Path) -> Result<Self> {
        let mut command = launch_command(server_path)?;
        command.stdin(Stdio::piped()).stdout(Stdio::piped());

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to launch tool server {}", server_path.display()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to capture tool server stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture tool server stdout"))?;

        let client = Self {
            channel: Mutex::new(ChildChannel {
                child,
                stdin,
                stdout: BufReader::new(stdout).lines(),
            }),
            request_id: AtomicU64::new(1),
            request_timeout: REQUEST_TIMEOUT,
        };

        client
            .send_request(
                methods::INITIALIZE,
                json!({
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                    "capabilities": {"tools": {}},
                }),
            )
            .await
            .context("initializing tool server connection")?;

        Ok(client)
    }

    async fn send_request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let mut payload = serde_json::to_string(&Request::new(id, method, params))?;
        payload.push('\n');

        let mut channel = self.channel.lock().await;
        channel
            .stdin
            .write_all(payload.as_bytes())
            .await
            .context("writing to tool server")?;
        channel.stdin.flush().await.context("flushing tool server stdin")?;

        loop {
            let line = timeout(self.request_timeout, channel.stdout.next_line())
                .await
                .map_err(|_| anyhow!("timed out waiting for tool server response"))?
                .context("reading from tool server")?
                .ok_or_else(|| anyhow!("tool server closed the channel"))?;

            if line.trim().is_empty() {
                continue;
            }

            let response: Response =
                serde_json::from_str(&line).context("decoding tool server response")?;

            // Notifications and stale responses are skipped; calls are
            // serialized so anything else belongs to this request.
            if response.id != Some(id) {
                debug!(%line, "skipping unrelated channel message");
                continue;
            }

            if let Some(error) = response.error {
                bail!("tool server error {}: {}", error.code, error.message);
            }
            return Ok(response.result.unwrap_or(Value::Null));
        }
    }
}

#[async_trait]
impl ToolExecutor for ChannelClient {
    async fn list_tools(&self) -> Result<Vec<Tool>> {
        let result = self.send_request(methods::LIST_TOOLS, json!({})).await?;
        let listed: ListToolsResult =
            serde_json::from_value(result).context("decoding tool list")?;
        Ok(listed.tools.into_iter().map(Tool::from).collect())
    }

    async fn call_tool(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        let params = serde_json::to_value(CallToolParams {
            name: tool_call.name,
            arguments: tool_call.arguments,
        })
        .map_err(|e| AgentError::Internal(e.to_string()))?;

        // Channel-level failures on an established connection are downgraded
        // to execution errors so they flow back to the model as data.
        let result = self
            .send_request(methods::CALL_TOOL, params)
            .await
            .map_err(|e| AgentError::ExecutionError(e.to_string()))?;

        let call_result: CallToolResult = serde_json::from_value(result)
            .map_err(|e| AgentError::ExecutionError(format!("invalid tool call response: {e}")))?;

        if call_result.is_error {
            let text = call_result
                .content
                .iter()
                .filter_map(|content| content.as_text())
                .collect::<Vec<_>>()
                .join("\n");
            return Err(AgentError::ExecutionError(text));
        }

        Ok(call_result.content)
    }
}

/// Map a launch path to a command: `.py` and `.js` dispatch to their
/// interpreters, an extensionless path is executed directly. Anything else
/// is rejected before spawning.
fn launch_command(path: &Path) -> Result<Command> {
    if !path.exists() {
        bail!("tool server not found: {}", path.display());
    }

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("py") => {
            let python = if cfg!(windows) { "python" } else { "python3" };
            let mut command = Command::new(python);
            command.arg(path);
            Ok(command)
        }
        Some("js") => {
            let mut command = Command::new("node");
            command.arg(path);
            Ok(command)
        }
        None => Ok(Command::new(path)),
        Some(other) => bail!(
            "unsupported tool server `.{}`: expected a .py or .js script, or a native executable",
            other
        ),
    }
}
