//! Locally hosted MCP tool servers.
//!
//! Each agent gets its own instance of every server kind its role calls
//! for. A server binds a loopback port from the process-wide allocator and
//! exposes its tool catalog at `http://localhost:{port}/mcp`; the backend
//! process is the MCP client and routes tool calls there directly, so this
//! crate never proxies tool traffic.
//!
//! The concrete servers (git, memory, task management, agent control, the
//! Flutter runtime bridge, user questions) live outside the orchestrator.
//! They plug in through [`ServerCatalog`] factories and the uniform
//! [`McpServer`] contract.

mod catalog;
mod fleet;
mod server;

use async_trait::async_trait;
use serde_json::Value;

use crate::ports::PortError;

pub use catalog::{AgentContext, ServerCatalog, ServerFactory};
pub use fleet::McpFleet;
pub use server::{DynamicTool, LocalToolServer, ToolHandler};

/// Errors from MCP server lifecycle management.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error(transparent)]
    Port(#[from] PortError),

    #[error("failed to bind MCP server {name} on port {port}: {source}")]
    Bind {
        name: String,
        port: u16,
        source: std::io::Error,
    },

    #[error("MCP server {0} is not running")]
    NotRunning(String),
}

/// Uniform contract every MCP server instance honors.
///
/// `start` and `stop` use interior mutability so fleets can hold servers
/// behind shared references; `stop` is idempotent and releases the port.
#[async_trait]
pub trait McpServer: Send + Sync {
    /// Stable name, used as the key in the backend's `mcpServers` config.
    fn name(&self) -> &str;

    /// Tool names this server advertises.
    fn tool_names(&self) -> Vec<String>;

    /// Bind a port and begin serving. The server is running once this
    /// returns Ok.
    async fn start(&self) -> Result<(), McpError>;

    /// Stop serving and release the port. Safe to call repeatedly.
    async fn stop(&self);

    /// The `{"type": "http", "url": ...}` entry for the backend config.
    /// Errors if the server has not been started.
    async fn tool_config(&self) -> Result<Value, McpError>;
}
