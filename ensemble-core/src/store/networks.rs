//! The `agent_networks.json` store.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{atomic_write_json, StorageRoot, StoreError};
use crate::types::AgentNetwork;

#[derive(Debug, Default, Serialize, Deserialize)]
struct NetworksFile {
    networks: Vec<AgentNetwork>,
}

/// Load/save of a project's agent networks.
#[derive(Debug, Clone)]
pub struct NetworkStore {
    path: PathBuf,
}

impl NetworkStore {
    pub fn new(root: &StorageRoot, project: &Path) -> Self {
        Self {
            path: root.project_dir(project).join("agent_networks.json"),
        }
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All persisted networks. Missing or corrupt files yield an empty
    /// list; the corrupt file is left untouched.
    pub fn load(&self) -> Vec<AgentNetwork> {
        let Ok(raw) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        match serde_json::from_str::<NetworksFile>(&raw) {
            Ok(file) => file.networks,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "corrupt network store, starting empty: {e}");
                Vec::new()
            }
        }
    }

    /// Replace the stored list.
    pub fn save(&self, networks: &[AgentNetwork]) -> Result<(), StoreError> {
        atomic_write_json(
            &self.path,
            &NetworksFile {
                networks: networks.to_vec(),
            },
        )
    }

    /// Insert or update one network by id.
    pub fn upsert(&self, network: &AgentNetwork) -> Result<(), StoreError> {
        let mut networks = self.load();
        match networks.iter_mut().find(|n| n.id == network.id) {
            Some(slot) => *slot = network.clone(),
            None => networks.push(network.clone()),
        }
        self.save(&networks)
    }

    /// Look up one network by id.
    pub fn find(&self, network_id: &str) -> Option<AgentNetwork> {
        self.load().into_iter().find(|n| n.id == network_id)
    }

    /// Remove a network. Returns whether anything was removed.
    pub fn remove(&self, network_id: &str) -> Result<bool, StoreError> {
        let mut networks = self.load();
        let before = networks.len();
        networks.retain(|n| n.id != network_id);
        let removed = networks.len() < before;
        if removed {
            self.save(&networks)?;
        }
        Ok(removed)
    }
}
