//! MCP (Model Context Protocol) Server
//!
//! This module implements an MCP server using manual JSON-RPC 2.0 over stdio.
//!
//! # Architecture
//!
//! - **Transport**: JSON-RPC 2.0 over stdio (line-based)
//! - **Dependencies**: Only `serde_json` and anyhow (no MCP-specific crates)
//! - **State**: One [`QueryExecutor`] for the whole session; its pools are
//!   reused across tool calls and closed when the session ends
//!
//! # Error Reporting
//!
//! Tool failures are tool results with `isError: true` whose text is the
//! pretty-printed [`ErrorReport`](crate::classifier::ErrorReport). Malformed
//! requests are JSON-RPC errors.
//!
//! # Usage
//!
//! Start the MCP server with: `tsql-warden mcp` (or no subcommand at all)
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "sqlserver": {
//!       "command": "tsql-warden",
//!       "env": {
//!         "SQLSERVER_HOST": "localhost",
//!         "SQLSERVER_USER": "reader",
//!         "SQLSERVER_PASSWORD": "..."
//!       }
//!     }
//!   }
//! }
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::classifier::describe;
use crate::connection::Connection;
use crate::executor::QueryExecutor;
use crate::tools::{call_tool, Tool};

const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;
const INTERNAL_ERROR: i32 = -32603;

// ============================================================================
// JSON-RPC 2.0 Structures
// ============================================================================

/// JSON-RPC 2.0 Request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    jsonrpc: String,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    #[must_use]
    pub const fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// JSON-RPC error code, if this is an error response
    #[must_use]
    pub fn error_code(&self) -> Option<i32> {
        self.error.as_ref().map(|e| e.code)
    }
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

// ============================================================================
// MCP Tool Result Structures
// ============================================================================

/// Text content block for MCP tool results
#[derive(Debug, Serialize)]
struct TextContent {
    #[serde(rename = "type")]
    content_type: String,
    text: String,
}

impl TextContent {
    fn new(text: String) -> Self {
        Self {
            content_type: "text".to_string(),
            text,
        }
    }
}

/// MCP tool call result
#[derive(Debug, Serialize)]
struct CallToolResult {
    content: Vec<TextContent>,
    #[serde(rename = "isError")]
    is_error: bool,
}

impl CallToolResult {
    /// Create a tool result carrying pretty-printed JSON
    fn new(data: &impl Serialize, is_error: bool) -> Result<Value> {
        let json_text = serde_json::to_string_pretty(data)?;
        let result = Self {
            content: vec![TextContent::new(json_text)],
            is_error,
        };
        Ok(serde_json::to_value(result)?)
    }
}

/// Protocol-level failure with its JSON-RPC code
struct RpcFailure {
    code: i32,
    message: String,
}

impl RpcFailure {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for RpcFailure {
    fn from(e: anyhow::Error) -> Self {
        Self::new(INTERNAL_ERROR, e.to_string())
    }
}

// ============================================================================
// MCP Server
// ============================================================================

/// Start the MCP server
///
/// Reads JSON-RPC requests from stdin, one per line, and writes one response
/// line per request to stdout. Notifications get no response.
///
/// The session ends at stdin EOF or Ctrl-C; every pool is closed before
/// returning.
///
/// # Errors
///
/// Returns an error if stdio communication fails.
pub async fn serve<C: Connection + 'static>(executor: QueryExecutor<C>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    info!("MCP server listening on stdio");

    let outcome = async {
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, shutting down");
                    None
                }
            };
            let Some(line) = line else {
                break;
            };

            if let Some(response) = handle_line(&executor, &line).await {
                let mut response_json = serde_json::to_string(&response)?;
                response_json.push('\n');
                stdout.write_all(response_json.as_bytes()).await?;
                stdout.flush().await?;
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    executor.shutdown().await;
    outcome
}

/// Handle one input line
///
/// Returns `None` for blank lines and notifications.
pub async fn handle_line<C: Connection + 'static>(
    executor: &QueryExecutor<C>,
    line: &str,
) -> Option<JsonRpcResponse> {
    if line.trim().is_empty() {
        return None;
    }

    match serde_json::from_str::<JsonRpcRequest>(line) {
        Ok(request) => handle_request(executor, request).await,
        Err(e) => Some(JsonRpcResponse::failure(None, PARSE_ERROR, format!("Parse error: {e}"))),
    }
}

/// Handle a JSON-RPC request
///
/// Routes the request to the appropriate handler based on the method name.
async fn handle_request<C: Connection + 'static>(
    executor: &QueryExecutor<C>,
    request: JsonRpcRequest,
) -> Option<JsonRpcResponse> {
    debug!(method = %request.method, "Handling request");

    if request.method.starts_with("notifications/") {
        return None;
    }

    let result = match request.method.as_str() {
        "initialize" => Ok(handle_initialize()),
        "ping" => Ok(serde_json::json!({})),
        "tools/list" => Ok(handle_list_tools()),
        "tools/call" => handle_call_tool(executor, request.params).await,
        _ => Err(RpcFailure::new(METHOD_NOT_FOUND, format!("Unknown method: {}", request.method))),
    };

    Some(match result {
        Ok(value) => JsonRpcResponse::success(request.id, value),
        Err(failure) => JsonRpcResponse::failure(request.id, failure.code, failure.message),
    })
}

// ============================================================================
// MCP Protocol Handlers
// ============================================================================

/// Returns server capabilities and metadata
fn handle_initialize() -> Value {
    serde_json::json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {
            "tools": {}
        },
        "serverInfo": {
            "name": "tsql-warden",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

fn handle_list_tools() -> Value {
    let tools: Vec<Value> = Tool::ALL
        .iter()
        .map(|tool| {
            serde_json::json!({
                "name": tool.name(),
                "description": tool.description(),
                "inputSchema": tool.input_schema(),
            })
        })
        .collect();

    serde_json::json!({ "tools": tools })
}

async fn handle_call_tool<C: Connection + 'static>(
    executor: &QueryExecutor<C>,
    params: Option<Value>,
) -> std::result::Result<Value, RpcFailure> {
    let params = params.ok_or_else(|| RpcFailure::new(INVALID_PARAMS, "Missing params"))?;
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcFailure::new(INVALID_PARAMS, "Missing tool name"))?;
    let empty = Value::Object(serde_json::Map::new());
    let arguments = match params.get("arguments") {
        None | Some(Value::Null) => &empty,
        Some(arguments) => arguments,
    };

    match call_tool(executor, name, arguments).await {
        Ok(data) => Ok(CallToolResult::new(&data, false)?),
        Err(e) => {
            debug!(tool = name, error = %e, "Tool call failed");
            Ok(CallToolResult::new(&describe(&e), true)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ConnectionConfig, QueryParam, Recordset};
    use crate::error::RawFault;
    use crate::pool::{ConnectionManager, DEFAULT_IDLE_TIMEOUT};
    use async_trait::async_trait;

    /// Connection that must never be reached
    struct Unreachable(ConnectionConfig);

    #[async_trait]
    impl Connection for Unreachable {
        async fn connect(&self) -> std::result::Result<(), RawFault> {
            Err(RawFault::with_code("ESOCKET", "no server in tests"))
        }
        async fn disconnect(&self) -> std::result::Result<(), RawFault> {
            Ok(())
        }
        async fn query(&self, _sql: &str) -> std::result::Result<Recordset, RawFault> {
            Err(RawFault::not_connected())
        }
        async fn query_with_params(
            &self,
            _sql: &str,
            _params: &[QueryParam],
        ) -> std::result::Result<Recordset, RawFault> {
            Err(RawFault::not_connected())
        }
        async fn test_connection(&self) -> bool {
            false
        }
        fn is_connected(&self) -> bool {
            false
        }
        fn config(&self) -> &ConnectionConfig {
            &self.0
        }
    }

    fn executor() -> QueryExecutor<Unreachable> {
        let base = ConnectionConfig::new("localhost", "reader", "pw");
        QueryExecutor::new(ConnectionManager::with_factory(base, DEFAULT_IDLE_TIMEOUT, Unreachable))
    }

    fn tool_call(id: i64, params: Value) -> String {
        serde_json::json!({"jsonrpc": "2.0", "id": id, "method": "tools/call", "params": params})
            .to_string()
    }

    fn tool_text(response: &JsonRpcResponse) -> (bool, Value) {
        let result = response.result().unwrap();
        let text = result["content"][0]["text"].as_str().unwrap();
        (result["isError"].as_bool().unwrap(), serde_json::from_str(text).unwrap())
    }

    #[tokio::test]
    async fn test_initialize() {
        let line = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#;
        let response = handle_line(&executor(), line).await.unwrap();

        let result = response.result().unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "tsql-warden");
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn test_parse_error() {
        let response = handle_line(&executor(), "{not json").await.unwrap();
        assert_eq!(response.error_code(), Some(PARSE_ERROR));
    }

    #[tokio::test]
    async fn test_blank_lines_and_notifications_are_silent() {
        let executor = executor();
        assert!(handle_line(&executor, "   ").await.is_none());

        let line = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        assert!(handle_line(&executor, line).await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let line = r#"{"jsonrpc":"2.0","id":7,"method":"resources/list"}"#;
        let response = handle_line(&executor(), line).await.unwrap();
        assert_eq!(response.error_code(), Some(METHOD_NOT_FOUND));

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["id"], 7);
    }

    #[tokio::test]
    async fn test_list_tools_has_every_tool() {
        let line = r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#;
        let response = handle_line(&executor(), line).await.unwrap();

        let tools = response.result().unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), Tool::ALL.len());
        for tool in &tools {
            assert!(tool["name"].is_string());
            assert!(tool["description"].is_string());
            assert_eq!(tool["inputSchema"]["type"], "object");
        }
    }

    #[tokio::test]
    async fn test_call_without_name_is_invalid_params() {
        let line = r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"arguments":{}}}"#;
        let response = handle_line(&executor(), line).await.unwrap();
        assert_eq!(response.error_code(), Some(INVALID_PARAMS));
    }

    #[tokio::test]
    async fn test_rejected_query_is_tool_error() {
        let params = serde_json::json!({
            "name": "execute_query",
            "arguments": {"query": "DROP TABLE users"},
        });
        let response = handle_line(&executor(), &tool_call(4, params)).await.unwrap();

        let (is_error, report) = tool_text(&response);
        assert!(is_error);
        assert_eq!(report["code"], "VALIDATION_ERROR");
        assert!(report["error"].as_str().unwrap().contains("Query validation failed"));
        assert!(report["suggestions"].is_array());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_tool_error() {
        let line = tool_call(5, serde_json::json!({"name": "drop_everything"}));
        let response = handle_line(&executor(), &line).await.unwrap();

        let (is_error, report) = tool_text(&response);
        assert!(is_error);
        assert_eq!(report["error"], "Unknown tool: drop_everything");
    }

    #[tokio::test]
    async fn test_connection_failure_is_classified() {
        let line = tool_call(6, serde_json::json!({"name": "list_databases"}));
        let response = handle_line(&executor(), &line).await.unwrap();

        let (is_error, report) = tool_text(&response);
        assert!(is_error);
        assert_eq!(report["code"], "CONNECTION_ERROR");
    }
}
