//! The agent network manager.
//!
//! Owns the currently focused network, the `AgentId → adapter` map, and the
//! per-network permission gate. All mutations go through the manager and
//! are serialized behind one async lock; readers get cloned snapshots.
//!
//! Adapters never hold the manager: they receive an immutable launch view
//! (agent id, working directory, fleet, permission mode) and the manager
//! keeps the only strong handle, so teardown always flows manager → adapter.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

use crate::client::{
    ClaudeClient, ClaudeConfig, OutboundMessage, PermissionMode, TurnCompletion, TurnSignal,
};
use crate::mcp::{AgentContext, ServerCatalog};
use crate::permission::{DenyAllAsker, PermissionAsker, PermissionGate};
use crate::store::{NetworkStore, StoreError};
use crate::types::{
    AgentId, AgentMetadata, AgentNetwork, AgentStatus, AgentType, TokenStats,
};

/// Errors from network and agent lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("no active network")]
    NoActiveNetwork,

    #[error("network not found: {0}")]
    NetworkNotFound(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("the main agent cannot be spawned or terminated explicitly")]
    MainAgentProtected,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Manager configuration; built once at process start.
pub struct ManagerConfig {
    /// Fallback working directory for networks without a worktree.
    pub default_working_dir: PathBuf,
    pub store: NetworkStore,
    pub catalog: Arc<ServerCatalog>,
    pub asker: Arc<dyn PermissionAsker>,
    /// Backend executable, resolved from PATH.
    pub backend_binary: String,
    /// Incremental-delta streaming toggle, applied to every agent.
    pub streaming_deltas: bool,
    /// Optional stdio kernel server appended to every agent's MCP config.
    pub kernel_server: Option<(String, Value)>,
}

impl ManagerConfig {
    pub fn new(default_working_dir: impl Into<PathBuf>, store: NetworkStore) -> Self {
        Self {
            default_working_dir: default_working_dir.into(),
            store,
            catalog: Arc::new(ServerCatalog::new()),
            asker: Arc::new(DenyAllAsker),
            backend_binary: "claude".to_string(),
            streaming_deltas: false,
            kernel_server: None,
        }
    }
}

struct ManagerState {
    current: Option<AgentNetwork>,
    adapters: HashMap<AgentId, Arc<ClaudeClient>>,
    gate: Option<Arc<PermissionGate>>,
}

/// Multi-agent lifecycle, inter-agent messaging, and persistence.
pub struct AgentNetworkManager {
    config: ManagerConfig,
    state: RwLock<ManagerState>,
    /// Process-local display counter behind "Task N" goals. Not persisted;
    /// restarts reset it.
    task_counter: AtomicU64,
}

impl AgentNetworkManager {
    pub fn new(config: ManagerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: RwLock::new(ManagerState {
                current: None,
                adapters: HashMap::new(),
                gate: None,
            }),
            task_counter: AtomicU64::new(0),
        })
    }

    /// Create a network with one main agent and send it the first message.
    ///
    /// The adapter is constructed without blocking so callers can attach
    /// subscribers immediately; persistence happens off the critical path.
    pub async fn start_new(
        self: &Arc<Self>,
        initial_message: &str,
        working_directory: Option<PathBuf>,
    ) -> Result<AgentNetwork, NetworkError> {
        let n = self.task_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let mut network = AgentNetwork::new(format!("Task {n}"), AgentMetadata::main("Main"));
        network.worktree_path = working_directory
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());

        let main_meta = network.main_agent().clone();
        let adapter = self.build_adapter(&main_meta, &network);

        {
            let mut state = self.state.write().await;
            self.teardown_locked(&mut state).await;
            state.gate = Some(self.build_gate(&network));
            state.adapters.insert(main_meta.id.clone(), adapter.clone());
            state.current = Some(network.clone());
        }

        self.watch_turns(main_meta.id.clone(), &adapter);
        self.persist_background(network.clone());
        adapter.send_message(OutboundMessage::text(initial_message));
        tracing::info!(network = %network.id, agent = %main_meta.id, "network started");
        Ok(network)
    }

    /// Make a persisted network current again, recreating every adapter.
    pub async fn resume(self: &Arc<Self>, network: AgentNetwork) -> Result<AgentNetwork, NetworkError> {
        let mut network = network;
        network.touch();

        let adapters: Vec<(AgentMetadata, Arc<ClaudeClient>)> = network
            .agents
            .iter()
            .map(|meta| (meta.clone(), self.build_adapter(meta, &network)))
            .collect();

        {
            let mut state = self.state.write().await;
            if state
                .current
                .as_ref()
                .map(|c| c.id == network.id)
                .unwrap_or(false)
            {
                // Already current; drop the fresh adapters unstarted.
                for (_, adapter) in &adapters {
                    adapter.abort().await;
                }
                return Ok(state.current.clone().expect("checked above"));
            }
            self.teardown_locked(&mut state).await;
            state.gate = Some(self.build_gate(&network));
            for (meta, adapter) in &adapters {
                state.adapters.insert(meta.id.clone(), adapter.clone());
            }
            state.current = Some(network.clone());
        }

        for (meta, adapter) in &adapters {
            self.watch_turns(meta.id.clone(), adapter);
        }
        self.config.store.upsert(&network)?;
        tracing::info!(network = %network.id, agents = network.agents.len(), "network resumed");
        Ok(network)
    }

    /// Spawn a sub-agent into the active network. Spawning `main` is
    /// forbidden.
    pub async fn spawn_agent(
        self: &Arc<Self>,
        agent_type: AgentType,
        name: &str,
        initial_prompt: &str,
        spawned_by: &str,
    ) -> Result<AgentId, NetworkError> {
        if agent_type == AgentType::Main {
            return Err(NetworkError::MainAgentProtected);
        }

        let (meta, network) = {
            let mut state = self.state.write().await;
            let network = state.current.as_mut().ok_or(NetworkError::NoActiveNetwork)?;
            let meta = AgentMetadata::spawned(agent_type, name, spawned_by.to_string());
            network.add_agent(meta.clone());
            network.touch();
            (meta, network.clone())
        };

        let adapter = self.build_adapter(&meta, &network);
        self.state
            .write()
            .await
            .adapters
            .insert(meta.id.clone(), adapter.clone());
        self.watch_turns(meta.id.clone(), &adapter);
        self.persist_background(network);

        adapter.send_message(OutboundMessage::text(format!(
            "[SPAWNED BY AGENT: {spawned_by}]\n\n{initial_prompt}"
        )));
        tracing::info!(agent = %meta.id, r#type = %agent_type, spawned_by, "agent spawned");
        Ok(meta.id)
    }

    /// Terminate a sub-agent. The main agent only dies with its network.
    pub async fn terminate_agent(
        &self,
        target_id: &str,
        terminated_by: &str,
        reason: Option<&str>,
    ) -> Result<(), NetworkError> {
        let adapter = {
            let mut state = self.state.write().await;
            let network = state.current.as_mut().ok_or(NetworkError::NoActiveNetwork)?;
            let agent = network
                .agent(target_id)
                .ok_or_else(|| NetworkError::AgentNotFound(target_id.to_string()))?;
            if agent.agent_type == AgentType::Main {
                return Err(NetworkError::MainAgentProtected);
            }
            network.remove_agent(target_id);
            network.touch();
            state.adapters.remove(target_id)
        };

        if let Some(adapter) = adapter {
            adapter.abort().await;
        }
        let network = self.current_network().await.ok_or(NetworkError::NoActiveNetwork)?;
        self.config.store.upsert(&network)?;
        tracing::info!(
            agent = target_id,
            terminated_by,
            reason = reason.unwrap_or("unspecified"),
            "agent terminated"
        );
        Ok(())
    }

    /// Route a user message to an agent. Missing agents are a logged no-op.
    pub async fn send_message(&self, agent_id: &str, message: OutboundMessage) {
        let adapter = self.state.read().await.adapters.get(agent_id).cloned();
        match adapter {
            Some(adapter) => {
                self.mark_working(agent_id).await;
                adapter.send_message(message);
            }
            None => tracing::warn!(agent = agent_id, "send_message to unknown agent, dropped"),
        }
    }

    /// Inter-agent fire-and-forget message. Fails if the target is gone.
    pub async fn send_message_to_agent(
        &self,
        target_id: &str,
        content: &str,
        sent_by: &str,
    ) -> Result<(), NetworkError> {
        let adapter = self
            .state
            .read()
            .await
            .adapters
            .get(target_id)
            .cloned()
            .ok_or_else(|| NetworkError::AgentNotFound(target_id.to_string()))?;
        self.mark_working(target_id).await;
        adapter.send_message(OutboundMessage::text(format!(
            "[MESSAGE FROM AGENT: {sent_by}]\n\n{content}"
        )));
        Ok(())
    }

    /// Rename the network goal.
    pub async fn update_goal(&self, goal: &str) -> Result<(), NetworkError> {
        self.mutate_network(|network| network.goal = goal.to_string())
            .await
    }

    pub async fn update_agent_name(&self, agent_id: &str, name: &str) -> Result<(), NetworkError> {
        self.mutate_agent(agent_id, |agent| agent.name = name.to_string())
            .await
    }

    pub async fn update_agent_task_name(
        &self,
        agent_id: &str,
        task_name: Option<&str>,
    ) -> Result<(), NetworkError> {
        self.mutate_agent(agent_id, |agent| {
            agent.task_name = task_name.map(str::to_string)
        })
        .await
    }

    /// Token stats update in memory only; they reach disk with the next
    /// significant network write.
    pub async fn update_agent_token_stats(
        &self,
        agent_id: &str,
        stats: TokenStats,
    ) -> Result<(), NetworkError> {
        let mut state = self.state.write().await;
        let network = state.current.as_mut().ok_or(NetworkError::NoActiveNetwork)?;
        let agent = network
            .agent_mut(agent_id)
            .ok_or_else(|| NetworkError::AgentNotFound(agent_id.to_string()))?;
        agent.token_stats.add(&stats);
        Ok(())
    }

    pub async fn set_worktree_path(&self, path: Option<&str>) -> Result<(), NetworkError> {
        self.mutate_network(|network| network.worktree_path = path.map(str::to_string))
            .await
    }

    /// Snapshot of the current network.
    pub async fn current_network(&self) -> Option<AgentNetwork> {
        self.state.read().await.current.clone()
    }

    /// Adapter handle for an agent, if it is alive.
    pub async fn adapter(&self, agent_id: &str) -> Option<Arc<ClaudeClient>> {
        self.state.read().await.adapters.get(agent_id).cloned()
    }

    /// Metadata snapshot for an agent in the current network.
    pub async fn agent_metadata(&self, agent_id: &str) -> Option<AgentMetadata> {
        self.state
            .read()
            .await
            .current
            .as_ref()
            .and_then(|n| n.agent(agent_id).cloned())
    }

    /// The active network's permission gate.
    pub async fn permission_gate(&self) -> Option<Arc<PermissionGate>> {
        self.state.read().await.gate.clone()
    }

    fn effective_working_dir(&self, network: &AgentNetwork) -> PathBuf {
        network
            .worktree_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config.default_working_dir.clone())
    }

    fn build_adapter(&self, meta: &AgentMetadata, network: &AgentNetwork) -> Arc<ClaudeClient> {
        let working_dir = self.effective_working_dir(network);
        let ctx = AgentContext {
            agent_id: meta.id.clone(),
            working_dir: working_dir.clone(),
        };
        let fleet = self.config.catalog.fleet_for(meta.agent_type, &ctx);
        let permission_mode = match meta.agent_type {
            AgentType::Planning => PermissionMode::Plan,
            _ => PermissionMode::AcceptEdits,
        };
        let mut config = ClaudeConfig::new(working_dir)
            .with_binary(self.config.backend_binary.clone())
            .with_permission_mode(permission_mode)
            .with_streaming_deltas(self.config.streaming_deltas);
        config.kernel_server = self.config.kernel_server.clone();
        ClaudeClient::create_nonblocking(meta.id.clone(), config, fleet)
    }

    fn build_gate(&self, network: &AgentNetwork) -> Arc<PermissionGate> {
        let project_dir = self.effective_working_dir(network);
        Arc::new(PermissionGate::for_project(
            project_dir,
            self.config.asker.clone(),
        ))
    }

    /// Flip an agent's status and fold in token usage when its turn ends.
    fn watch_turns(self: &Arc<Self>, agent_id: AgentId, adapter: &Arc<ClaudeClient>) {
        let mut turn_rx = adapter.on_turn_complete();
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match turn_rx.recv().await {
                    Ok(TurnSignal::Completed(completion)) => {
                        let Some(manager) = manager.upgrade() else { break };
                        manager.note_turn_complete(&agent_id, completion).await;
                    }
                    Ok(TurnSignal::Closed { .. }) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(agent = %agent_id, skipped, "turn watcher lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    async fn note_turn_complete(&self, agent_id: &str, completion: TurnCompletion) {
        let mut state = self.state.write().await;
        let Some(network) = state.current.as_mut() else { return };
        if let Some(agent) = network.agent_mut(agent_id) {
            agent.status = AgentStatus::Idle;
            agent.token_stats.add(&TokenStats {
                input_tokens: completion.usage.input_tokens,
                output_tokens: completion.usage.output_tokens,
                ..TokenStats::default()
            });
        }
    }

    async fn mark_working(&self, agent_id: &str) {
        let mut state = self.state.write().await;
        if let Some(network) = state.current.as_mut() {
            if let Some(agent) = network.agent_mut(agent_id) {
                agent.status = AgentStatus::Working;
            }
        }
    }

    async fn mutate_network(
        &self,
        mutate: impl FnOnce(&mut AgentNetwork),
    ) -> Result<(), NetworkError> {
        let network = {
            let mut state = self.state.write().await;
            let network = state.current.as_mut().ok_or(NetworkError::NoActiveNetwork)?;
            mutate(network);
            network.touch();
            network.clone()
        };
        self.config.store.upsert(&network)?;
        Ok(())
    }

    async fn mutate_agent(
        &self,
        agent_id: &str,
        mutate: impl FnOnce(&mut AgentMetadata),
    ) -> Result<(), NetworkError> {
        let network = {
            let mut state = self.state.write().await;
            let network = state.current.as_mut().ok_or(NetworkError::NoActiveNetwork)?;
            let agent = network
                .agent_mut(agent_id)
                .ok_or_else(|| NetworkError::AgentNotFound(agent_id.to_string()))?;
            mutate(agent);
            network.touch();
            network.clone()
        };
        self.config.store.upsert(&network)?;
        Ok(())
    }

    /// Abort every adapter of the outgoing current network.
    async fn teardown_locked(&self, state: &mut ManagerState) {
        for (_, adapter) in state.adapters.drain() {
            adapter.abort().await;
        }
        state.gate = None;
    }

    fn persist_background(&self, network: AgentNetwork) {
        let store = self.config.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.upsert(&network) {
                tracing::error!(network = %network.id, "background persist failed: {e}");
            }
        });
    }
}
