//! Per-agent fleets of MCP servers.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::{McpError, McpServer};

/// The set of MCP servers backing one agent.
///
/// Servers are keyed by name in the backend config; names within a fleet
/// are unique by construction (the catalog registers one factory per kind).
pub struct McpFleet {
    servers: Vec<Arc<dyn McpServer>>,
}

impl McpFleet {
    pub fn new(servers: Vec<Arc<dyn McpServer>>) -> Self {
        Self { servers }
    }

    /// A fleet with no servers; used by tests and bare agents.
    pub fn empty() -> Self {
        Self {
            servers: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn server_names(&self) -> Vec<String> {
        self.servers.iter().map(|s| s.name().to_string()).collect()
    }

    /// Every tool name advertised across the fleet.
    pub fn tool_names(&self) -> Vec<String> {
        self.servers.iter().flat_map(|s| s.tool_names()).collect()
    }

    /// Start every server. If one fails, servers started so far are shut
    /// down before the error propagates, so no port leaks.
    pub async fn start_all(&self) -> Result<(), McpError> {
        for (idx, server) in self.servers.iter().enumerate() {
            if let Err(e) = server.start().await {
                for started in &self.servers[..idx] {
                    started.stop().await;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Stop every server. Idempotent.
    pub async fn shutdown(&self) {
        for server in &self.servers {
            server.stop().await;
        }
    }

    /// Build the backend's `--mcp-config` JSON string:
    /// `{"mcpServers": {"<name>": {"type": "http", "url": ...}, ...}}`.
    ///
    /// A stdio-transport kernel entry may be appended alongside the HTTP
    /// servers.
    pub async fn config_json(&self, kernel: Option<(&str, Value)>) -> Result<String, McpError> {
        let mut entries = Map::new();
        for server in &self.servers {
            entries.insert(server.name().to_string(), server.tool_config().await?);
        }
        if let Some((name, entry)) = kernel {
            entries.insert(name.to_string(), entry);
        }
        let config = json!({ "mcpServers": Value::Object(entries) });
        Ok(config.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::{DynamicTool, LocalToolServer};

    fn noop_tool(name: &str) -> DynamicTool {
        DynamicTool::new(name, "does nothing", |_| Box::pin(async { Ok(Value::Null) }))
    }

    fn fleet_of(names: &[&str]) -> McpFleet {
        McpFleet::new(
            names
                .iter()
                .map(|n| {
                    Arc::new(LocalToolServer::new(*n, vec![noop_tool(&format!("{n}_tool"))]))
                        as Arc<dyn McpServer>
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_config_json_keys_servers_by_name() {
        let fleet = fleet_of(&["memory", "git"]);
        fleet.start_all().await.unwrap();

        let config = fleet.config_json(None).await.unwrap();
        let parsed: Value = serde_json::from_str(&config).unwrap();
        let servers = parsed["mcpServers"].as_object().unwrap();
        assert_eq!(servers.len(), 2);
        for name in ["memory", "git"] {
            assert_eq!(servers[name]["type"], "http");
            let url = servers[name]["url"].as_str().unwrap();
            assert!(url.starts_with("http://localhost:"));
            assert!(url.ends_with("/mcp"));
        }

        // Ports are unique per server instance.
        assert_ne!(servers["memory"]["url"], servers["git"]["url"]);
        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_config_json_appends_kernel_entry() {
        let fleet = fleet_of(&["memory"]);
        fleet.start_all().await.unwrap();

        let kernel = json!({"type": "stdio", "command": "ensemble-kernel"});
        let config = fleet
            .config_json(Some(("kernel", kernel.clone())))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&config).unwrap();
        assert_eq!(parsed["mcpServers"]["kernel"], kernel);
        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_config_before_start_errors() {
        let fleet = fleet_of(&["memory"]);
        assert!(fleet.config_json(None).await.is_err());
    }

    #[tokio::test]
    async fn test_tool_names_aggregate() {
        let fleet = fleet_of(&["a", "b"]);
        let mut names = fleet.tool_names();
        names.sort();
        assert_eq!(names, vec!["a_tool", "b_tool"]);
    }

    #[tokio::test]
    async fn test_empty_fleet_config() {
        let fleet = McpFleet::empty();
        let config = fleet.config_json(None).await.unwrap();
        let parsed: Value = serde_json::from_str(&config).unwrap();
        assert!(parsed["mcpServers"].as_object().unwrap().is_empty());
    }
}
