//! Per-project persistence.
//!
//! State lives under a storage root (`~/.ensemble` by default; the HTTP
//! service uses `~/.ensemble/api` so it never fights the terminal UI over
//! the same files). Inside the root, each project gets a directory named
//! after its canonicalized path with `/` replaced by `-`.
//!
//! All writes go through temp-file-plus-rename so a crash never leaves a
//! half-written JSON document. Reads tolerate missing and corrupt files by
//! returning defaults; corrupt files are left in place for inspection.

mod memory;
mod networks;

use std::path::{Path, PathBuf};

use serde::Serialize;

pub use memory::{MemoryEntry, MemoryStore};
pub use networks::NetworkStore;

/// Errors from persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Directory name for a project: canonicalized absolute path, `/` → `-`.
pub fn encode_project_path(project: &Path) -> String {
    let canonical = std::fs::canonicalize(project).unwrap_or_else(|_| project.to_path_buf());
    canonical.to_string_lossy().replace('/', "-")
}

/// Write JSON atomically: serialize to a temp file, then rename into place.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// A persistence root directory.
#[derive(Debug, Clone)]
pub struct StorageRoot {
    root: PathBuf,
}

impl StorageRoot {
    /// `~/.ensemble`, the terminal UI's root.
    pub fn default_root() -> Self {
        Self {
            root: home().join(".ensemble"),
        }
    }

    /// `~/.ensemble/api`, the HTTP service's isolated root.
    pub fn api_root() -> Self {
        Self {
            root: home().join(".ensemble").join("api"),
        }
    }

    /// An explicit root, for tests and alternate deployments.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// The directory holding one project's persisted files.
    pub fn project_dir(&self, project: &Path) -> PathBuf {
        self.root.join("projects").join(encode_project_path(project))
    }
}

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}
