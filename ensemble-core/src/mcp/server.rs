//! A dynamically-typed local tool server.
//!
//! [`LocalToolServer`] hosts a catalog of tools whose inputs and outputs
//! are plain JSON values. It speaks enough of the MCP JSON-RPC surface for
//! the backend to initialize, list tools, and call them: `initialize`,
//! `tools/list`, and `tools/call`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{extract::State, routing::post, Json, Router};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use super::{McpError, McpServer};
use crate::ports::PortAllocator;

/// Async handler for one tool. Receives the call arguments, returns the
/// result payload or an error string.
pub type ToolHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// A tool in a server's catalog.
#[derive(Clone)]
pub struct DynamicTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub handler: ToolHandler,
}

impl DynamicTool {
    /// Convenience constructor for a tool with a free-form object schema.
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> BoxFuture<'static, Result<Value, String>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: json!({"type": "object", "additionalProperties": true}),
            handler: Arc::new(handler),
        }
    }
}

struct Running {
    port: u16,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// An MCP server bound to a loopback port from the global allocator.
pub struct LocalToolServer {
    name: String,
    tools: Arc<Vec<DynamicTool>>,
    state: Mutex<Option<Running>>,
}

impl LocalToolServer {
    pub fn new(name: impl Into<String>, tools: Vec<DynamicTool>) -> Self {
        Self {
            name: name.into(),
            tools: Arc::new(tools),
            state: Mutex::new(None),
        }
    }

    /// The bound port, if running.
    pub async fn port(&self) -> Option<u16> {
        self.state.lock().await.as_ref().map(|r| r.port)
    }

    fn router(&self) -> Router {
        let shared = ServerShared {
            name: self.name.clone(),
            tools: self.tools.clone(),
        };
        Router::new().route("/mcp", post(rpc_handler)).with_state(Arc::new(shared))
    }
}

#[async_trait]
impl McpServer for LocalToolServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    async fn start(&self) -> Result<(), McpError> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Ok(());
        }

        let allocator = PortAllocator::global();
        let port = allocator.acquire(None).await?;

        let listener = match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(l) => l,
            Err(source) => {
                allocator.release(port);
                return Err(McpError::Bind {
                    name: self.name.clone(),
                    port,
                    source,
                });
            }
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let app = self.router();
        let name = self.name.clone();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                tracing::warn!("MCP server {name} exited with error: {e}");
            }
        });

        tracing::debug!(server = %self.name, port, "MCP server started");
        *state = Some(Running {
            port,
            shutdown_tx,
            task,
        });
        Ok(())
    }

    async fn stop(&self) {
        let running = self.state.lock().await.take();
        if let Some(running) = running {
            let _ = running.shutdown_tx.send(());
            let _ = running.task.await;
            PortAllocator::global().release(running.port);
            tracing::debug!(server = %self.name, port = running.port, "MCP server stopped");
        }
    }

    async fn tool_config(&self) -> Result<Value, McpError> {
        let port = self
            .port()
            .await
            .ok_or_else(|| McpError::NotRunning(self.name.clone()))?;
        Ok(json!({
            "type": "http",
            "url": format!("http://localhost:{port}/mcp"),
        }))
    }
}

struct ServerShared {
    name: String,
    tools: Arc<Vec<DynamicTool>>,
}

async fn rpc_handler(
    State(shared): State<Arc<ServerShared>>,
    Json(request): Json<Value>,
) -> Json<Value> {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(Value::as_str).unwrap_or("");

    let result = match method {
        "initialize" => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": shared.name, "version": env!("CARGO_PKG_VERSION")},
        }),
        "tools/list" => json!({
            "tools": shared.tools.iter().map(|t| json!({
                "name": t.name,
                "description": t.description,
                "inputSchema": t.input_schema,
            })).collect::<Vec<_>>(),
        }),
        "tools/call" => return Json(call_tool(&shared, id, request.get("params")).await),
        // Notifications carry no id and expect no meaningful reply.
        _ if id.is_null() => return Json(Value::Null),
        other => {
            return Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("method not found: {other}")},
            }))
        }
    };

    Json(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

async fn call_tool(shared: &ServerShared, id: Value, params: Option<&Value>) -> Value {
    let name = params
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("");
    let arguments = params
        .and_then(|p| p.get("arguments"))
        .cloned()
        .unwrap_or_else(|| json!({}));

    let Some(tool) = shared.tools.iter().find(|t| t.name == name) else {
        return json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32602, "message": format!("unknown tool: {name}")},
        });
    };

    let (text, is_error) = match (tool.handler)(arguments).await {
        Ok(value) => (
            match value {
                Value::String(s) => s,
                other => other.to_string(),
            },
            false,
        ),
        Err(message) => (message, true),
    };

    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "content": [{"type": "text", "text": text}],
            "isError": is_error,
        },
    })
}
