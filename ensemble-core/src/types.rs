//! Domain types for agent networks
//!
//! These types describe the persisted shape of a network: its agents, their
//! roles and status, and the token accounting attached to each agent. They
//! are shared between the manager, the persistence layer, and the HTTP
//! frontend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier for an agent.
///
/// The same string doubles as the backend session id, so the id must stay
/// stable for the lifetime of the agent, including across process restarts.
pub type AgentId = String;

/// Generate a fresh agent id.
pub fn new_agent_id() -> AgentId {
    Uuid::new_v4().to_string()
}

/// Role of an agent within a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentType {
    /// The coordinating agent; exactly one per network, always at position 0.
    Main,
    /// Writes code.
    Implementation,
    /// Gathers repository and environment context.
    ContextCollection,
    /// Produces plans without write access.
    Planning,
    /// Drives a running Flutter app.
    FlutterTester,
}

impl AgentType {
    /// Wire tag used in WebSocket envelopes and persisted JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Main => "main",
            AgentType::Implementation => "implementation",
            AgentType::ContextCollection => "contextCollection",
            AgentType::Planning => "planning",
            AgentType::FlutterTester => "flutterTester",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an agent is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentStatus {
    Working,
    WaitingForAgent,
    WaitingForUser,
    #[default]
    Idle,
}

/// Cumulative token usage and cost for one agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    /// Accumulated cost in USD.
    pub cost_usd: f64,
}

impl TokenStats {
    /// Fold another sample into this one.
    pub fn add(&mut self, other: &TokenStats) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
        self.cost_usd += other.cost_usd;
    }
}

/// Persisted description of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetadata {
    pub id: AgentId,
    /// Short display name.
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    /// Self-assigned task label, if the agent picked one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    /// Id of the agent that requested this spawn; None only for the main agent.
    #[serde(default)]
    pub spawned_by: Option<AgentId>,
    #[serde(default)]
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub token_stats: TokenStats,
}

impl AgentMetadata {
    /// Metadata for a network's main agent.
    pub fn main(name: impl Into<String>) -> Self {
        Self {
            id: new_agent_id(),
            name: name.into(),
            agent_type: AgentType::Main,
            task_name: None,
            spawned_by: None,
            status: AgentStatus::Working,
            created_at: Utc::now(),
            token_stats: TokenStats::default(),
        }
    }

    /// Metadata for an agent spawned by another agent.
    pub fn spawned(agent_type: AgentType, name: impl Into<String>, spawned_by: AgentId) -> Self {
        Self {
            id: new_agent_id(),
            name: name.into(),
            agent_type,
            task_name: None,
            spawned_by: Some(spawned_by),
            status: AgentStatus::Working,
            created_at: Utc::now(),
            token_stats: TokenStats::default(),
        }
    }
}

/// An ordered, persisted collection of agents sharing a working directory.
///
/// Position 0 is always the main agent. The network id is independent of any
/// agent id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentNetwork {
    pub id: String,
    /// Display goal; starts as "Task N" and may be renamed.
    pub goal: String,
    pub agents: Vec<AgentMetadata>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    /// Effective working directory for every agent in the network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<String>,
}

impl AgentNetwork {
    /// Create a network containing a single main agent.
    pub fn new(goal: impl Into<String>, main_agent: AgentMetadata) -> Self {
        debug_assert_eq!(main_agent.agent_type, AgentType::Main);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            goal: goal.into(),
            agents: vec![main_agent],
            created_at: now,
            last_active_at: now,
            worktree_path: None,
        }
    }

    /// The network's main agent.
    pub fn main_agent(&self) -> &AgentMetadata {
        &self.agents[0]
    }

    /// Find an agent by id.
    pub fn agent(&self, id: &str) -> Option<&AgentMetadata> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Mutable lookup by id.
    pub fn agent_mut(&mut self, id: &str) -> Option<&mut AgentMetadata> {
        self.agents.iter_mut().find(|a| a.id == id)
    }

    /// Append a non-main agent.
    pub fn add_agent(&mut self, agent: AgentMetadata) {
        debug_assert_ne!(agent.agent_type, AgentType::Main);
        self.agents.push(agent);
    }

    /// Remove an agent by id. Returns whether anything was removed.
    ///
    /// The main agent cannot be removed; callers must reject that before
    /// getting here.
    pub fn remove_agent(&mut self, id: &str) -> bool {
        let before = self.agents.len();
        self.agents.retain(|a| a.id != id || a.agent_type == AgentType::Main);
        self.agents.len() < before
    }

    /// Mark the network as recently used.
    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }
}
