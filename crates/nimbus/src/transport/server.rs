use anyhow::Result;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use super::protocol::{
    error_codes, methods, CallToolParams, CallToolResult, ListToolsResult, Request, Response,
    ToolDescriptor,
};
use crate::models::content::Content;
use crate::models::tool::ToolCall;
use crate::registry::ToolRegistry;

/// Executor-side channel loop: one JSON-RPC request per line in, one
/// response per line out. Every request-level failure is answered on the
/// channel; the loop itself ends only when the peer closes the reader.
pub async fn serve<R, W>(registry: &ToolRegistry, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                debug!(method = %request.method, id = request.id, "handling request");
                handle_request(registry, request).await
            }
            Err(e) => {
                warn!(error = %e, "discarding malformed request");
                Response::failure(None, error_codes::PARSE_ERROR, format!("invalid request: {e}"))
            }
        };

        let mut payload = serde_json::to_string(&response)?;
        payload.push('\n');
        writer.write_all(payload.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}

async fn handle_request(registry: &ToolRegistry, request: Request) -> Response {
    match request.method.as_str() {
        methods::INITIALIZE => Response::success(
            request.id,
            json!({
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": {"tools": {}},
            }),
        ),
        methods::LIST_TOOLS => {
            let tools: Vec<ToolDescriptor> =
                registry.tools().iter().map(ToolDescriptor::from).collect();
            success_result(request.id, &ListToolsResult { tools })
        }
        methods::CALL_TOOL => {
            let params: CallToolParams = match serde_json::from_value(request.params) {
                Ok(params) => params,
                Err(e) => {
                    return Response::failure(
                        Some(request.id),
                        error_codes::INVALID_PARAMS,
                        format!("invalid tools/call params: {e}"),
                    )
                }
            };

            // Dispatch failures stay on the normal result path so the
            // channel survives bad tool calls.
            let result = match registry
                .dispatch(ToolCall::new(params.name, params.arguments))
                .await
            {
                Ok(content) => CallToolResult {
                    content,
                    is_error: false,
                },
                Err(e) => {
                    warn!(error = %e, "tool call failed");
                    CallToolResult {
                        content: vec![Content::text(e.to_string())],
                        is_error: true,
                    }
                }
            };
            success_result(request.id, &result)
        }
        other => Response::failure(
            Some(request.id),
            error_codes::METHOD_NOT_FOUND,
            format!("unknown method: {other}"),
        ),
    }
}

fn success_result<T: serde::Serialize>(id: u64, result: &T) -> Response {
    match serde_json::to_value(result) {
        Ok(value) => Response::success(id, value),
        Err(e) => Response::failure(Some(id), error_codes::INTERNAL_ERROR, e.to_string()),
    }
}
