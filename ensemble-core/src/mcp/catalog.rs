//! Which server kinds each agent role receives.
//!
//! The orchestrator does not know what "git" or "memory" do; it only knows
//! that an implementation agent should carry them. Concrete servers
//! register a factory per kind, and [`ServerCatalog::fleet_for`] assembles
//! a fresh per-agent fleet from the kinds assigned to the agent's role.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::{McpFleet, McpServer};
use crate::types::{AgentId, AgentType};

/// Immutable view of the agent a server is being built for.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub agent_id: AgentId,
    pub working_dir: PathBuf,
}

/// Builds one server instance for one agent.
pub type ServerFactory = Arc<dyn Fn(&AgentContext) -> Arc<dyn McpServer> + Send + Sync>;

pub const KIND_GIT: &str = "git";
pub const KIND_MEMORY: &str = "memory";
pub const KIND_TASKS: &str = "task-management";
pub const KIND_AGENT_CONTROL: &str = "agent-control";
pub const KIND_ASK_USER: &str = "ask-user-question";
pub const KIND_FLUTTER_RUNTIME: &str = "flutter-runtime";

/// Registry of server factories plus the role → kinds assignment.
pub struct ServerCatalog {
    factories: HashMap<String, ServerFactory>,
    assignments: HashMap<AgentType, Vec<String>>,
}

impl ServerCatalog {
    /// Catalog with the default role assignments and no factories.
    pub fn new() -> Self {
        let mut assignments = HashMap::new();
        assignments.insert(
            AgentType::Main,
            kinds(&[KIND_GIT, KIND_MEMORY, KIND_TASKS, KIND_AGENT_CONTROL, KIND_ASK_USER]),
        );
        assignments.insert(
            AgentType::Implementation,
            kinds(&[KIND_GIT, KIND_MEMORY, KIND_TASKS, KIND_AGENT_CONTROL]),
        );
        assignments.insert(
            AgentType::ContextCollection,
            kinds(&[KIND_GIT, KIND_MEMORY, KIND_TASKS]),
        );
        assignments.insert(
            AgentType::Planning,
            kinds(&[KIND_MEMORY, KIND_TASKS, KIND_AGENT_CONTROL]),
        );
        assignments.insert(
            AgentType::FlutterTester,
            kinds(&[KIND_MEMORY, KIND_TASKS, KIND_FLUTTER_RUNTIME]),
        );
        Self {
            factories: HashMap::new(),
            assignments,
        }
    }

    /// Register (or replace) the factory for a server kind.
    pub fn register(&mut self, kind: impl Into<String>, factory: ServerFactory) {
        self.factories.insert(kind.into(), factory);
    }

    /// Override the kinds assigned to a role.
    pub fn assign(&mut self, agent_type: AgentType, kind_names: Vec<String>) {
        self.assignments.insert(agent_type, kind_names);
    }

    /// Kind names a role receives.
    pub fn kinds_for(&self, agent_type: AgentType) -> &[String] {
        self.assignments
            .get(&agent_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Build a fresh fleet for one agent. Kinds without a registered
    /// factory are skipped; the orchestrator runs fine with a partial
    /// catalog (tests, headless deployments).
    pub fn fleet_for(&self, agent_type: AgentType, ctx: &AgentContext) -> McpFleet {
        let mut servers = Vec::new();
        for kind in self.kinds_for(agent_type) {
            match self.factories.get(kind) {
                Some(factory) => servers.push(factory(ctx)),
                None => tracing::debug!(kind, "no factory registered for server kind, skipping"),
            }
        }
        McpFleet::new(servers)
    }
}

impl Default for ServerCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn kinds(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
