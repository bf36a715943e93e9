//! The per-project `memory.json` store.
//!
//! Small key/value facts agents remember about a project. Saving an
//! existing key preserves its `createdAt` and stamps `updatedAt`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{atomic_write_json, StorageRoot, StoreError};

/// One remembered fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryFile {
    entries: Vec<MemoryEntry>,
}

/// Load/save of a project's memory entries.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    path: PathBuf,
}

impl MemoryStore {
    pub fn new(root: &StorageRoot, project: &Path) -> Self {
        Self {
            path: root.project_dir(project).join("memory.json"),
        }
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// All entries; missing or corrupt files yield an empty list.
    pub fn entries(&self) -> Vec<MemoryEntry> {
        let Ok(raw) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        match serde_json::from_str::<MemoryFile>(&raw) {
            Ok(file) => file.entries,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "corrupt memory store, starting empty: {e}");
                Vec::new()
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<MemoryEntry> {
        self.entries().into_iter().find(|e| e.key == key)
    }

    /// Insert or update an entry. Updates keep the original creation time.
    pub fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries();
        match entries.iter_mut().find(|e| e.key == key) {
            Some(entry) => {
                entry.value = value.to_string();
                entry.updated_at = Some(Utc::now());
            }
            None => entries.push(MemoryEntry {
                key: key.to_string(),
                value: value.to_string(),
                created_at: Utc::now(),
                updated_at: None,
            }),
        }
        atomic_write_json(&self.path, &MemoryFile { entries })
    }

    /// Remove an entry. Returns whether anything was removed.
    pub fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|e| e.key != key);
        let removed = entries.len() < before;
        if removed {
            atomic_write_json(&self.path, &MemoryFile { entries })?;
        }
        Ok(removed)
    }
}
