//! Network lookup cache and auto-resume glue.
//!
//! HTTP requests arrive with just a network id. The cache resolves it to a
//! network (falling back to the persisted store on miss) and, when the
//! network is not the manager's current one, resumes it. This keeps the
//! HTTP layer stateless about which network happens to be focused.

use std::collections::HashMap;
use std::sync::Arc;

use ensemble_core::{AgentNetwork, AgentNetworkManager, NetworkStore};
use parking_lot::Mutex;

use crate::error::{ServerError, ServerResult};

/// In-memory network cache keyed by network id.
pub struct NetworkCache {
    store: NetworkStore,
    networks: Mutex<HashMap<String, AgentNetwork>>,
}

impl NetworkCache {
    pub fn new(store: NetworkStore) -> Self {
        Self {
            store,
            networks: Mutex::new(HashMap::new()),
        }
    }

    /// Record a freshly created network.
    pub fn insert(&self, network: AgentNetwork) {
        self.networks.lock().insert(network.id.clone(), network);
    }

    /// Resolve a network id, loading from persistence on cache miss.
    pub fn get(&self, network_id: &str) -> Option<AgentNetwork> {
        if let Some(network) = self.networks.lock().get(network_id).cloned() {
            return Some(network);
        }
        let network = self.store.find(network_id)?;
        self.networks
            .lock()
            .insert(network.id.clone(), network.clone());
        Some(network)
    }

    /// Resolve a network and make sure it is the manager's current one,
    /// resuming when it is not. Returns the network and whether a resume
    /// happened.
    pub async fn ensure_active(
        &self,
        manager: &Arc<AgentNetworkManager>,
        network_id: &str,
    ) -> ServerResult<(AgentNetwork, bool)> {
        let network = self
            .get(network_id)
            .ok_or_else(|| ServerError::NotFound(format!("network not found: {network_id}")))?;

        let is_current = manager
            .current_network()
            .await
            .map(|current| current.id == network_id)
            .unwrap_or(false);
        if is_current {
            let current = manager.current_network().await.expect("checked above");
            return Ok((current, false));
        }

        let resumed = manager.resume(network).await?;
        self.insert(resumed.clone());
        tracing::info!(network = network_id, "network resumed for request");
        Ok((resumed, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_core::{AgentMetadata, ManagerConfig};

    fn setup() -> (tempfile::TempDir, Arc<AgentNetworkManager>, NetworkCache) {
        let dir = tempfile::tempdir().unwrap();
        let store = NetworkStore::at_path(dir.path().join("agent_networks.json"));
        let mut config = ManagerConfig::new(dir.path(), store.clone());
        config.backend_binary = "cat".to_string();
        let manager = AgentNetworkManager::new(config);
        let cache = NetworkCache::new(store);
        (dir, manager, cache)
    }

    #[tokio::test]
    async fn test_get_falls_back_to_store() {
        let (_dir, _manager, cache) = setup();
        let network = AgentNetwork::new("Task 1", AgentMetadata::main("Main"));
        cache.store.upsert(&network).unwrap();

        assert!(cache.get(&network.id).is_some());
        // Second lookup hits the in-memory map.
        assert!(cache.get(&network.id).is_some());
    }

    #[tokio::test]
    async fn test_unknown_network_is_not_found() {
        let (_dir, manager, cache) = setup();
        let err = cache.ensure_active(&manager, "missing").await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_ensure_active_resumes_non_current() {
        let (_dir, manager, cache) = setup();
        let network = AgentNetwork::new("Task 1", AgentMetadata::main("Main"));
        cache.store.upsert(&network).unwrap();

        let (_, was_resumed) = cache.ensure_active(&manager, &network.id).await.unwrap();
        assert!(was_resumed);

        // Now current: no second resume.
        let (_, was_resumed) = cache.ensure_active(&manager, &network.id).await.unwrap();
        assert!(!was_resumed);
    }
}
