//! Project-local permission settings.
//!
//! `<project>/.claude/settings.local.json` holds the persisted rule lists:
//!
//! ```json
//! { "permissions": { "allow": [...], "deny": [...], "ask": [...] }, "hooks": {...} }
//! ```
//!
//! The file is shared with other tooling, so rewrites must preserve every
//! top-level key they do not understand (notably `hooks`). Corrupt or
//! missing files read as empty settings.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

/// Errors from reading or writing the settings file.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The permission rule lists from a settings file.
#[derive(Debug, Clone, Default)]
pub struct PermissionLists {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub ask: Vec<String>,
}

/// Handle on a project's `.claude/settings.local.json`.
#[derive(Debug, Clone)]
pub struct LocalSettings {
    path: PathBuf,
}

impl LocalSettings {
    /// Settings handle for a project directory.
    pub fn for_project(project_dir: impl AsRef<Path>) -> Self {
        Self {
            path: project_dir.as_ref().join(".claude").join("settings.local.json"),
        }
    }

    /// Settings handle at an explicit file path.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the full settings document. Missing or corrupt files yield an
    /// empty object; the corrupt file is left in place.
    pub fn read_document(&self) -> Map<String, Value> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return Map::new(),
        };
        match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                tracing::warn!(path = %self.path.display(), "settings file is not valid JSON, using defaults");
                Map::new()
            }
        }
    }

    /// Read the permission lists.
    pub fn permission_lists(&self) -> PermissionLists {
        let doc = self.read_document();
        let perms = doc.get("permissions").and_then(Value::as_object);
        let list = |key: &str| {
            perms
                .and_then(|p| p.get(key))
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };
        PermissionLists {
            allow: list("allow"),
            deny: list("deny"),
            ask: list("ask"),
        }
    }

    /// Append a pattern to `permissions.allow`, deduplicating, and rewrite
    /// the file atomically. Unrelated top-level fields survive verbatim.
    pub fn add_to_allow_list(&self, pattern: &str) -> Result<(), SettingsError> {
        let mut doc = self.read_document();

        let permissions = doc
            .entry("permissions".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        let permissions = match permissions {
            Value::Object(map) => map,
            other => {
                *other = Value::Object(Map::new());
                other.as_object_mut().expect("just set to object")
            }
        };

        let allow = permissions
            .entry("allow".to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        let allow = match allow {
            Value::Array(arr) => arr,
            other => {
                *other = Value::Array(Vec::new());
                other.as_array_mut().expect("just set to array")
            }
        };

        if allow.iter().any(|v| v.as_str() == Some(pattern)) {
            return Ok(());
        }
        allow.push(Value::String(pattern.to_string()));

        self.write_document(&doc)
    }

    fn write_document(&self, doc: &Map<String, Value>) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&Value::Object(doc.clone()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
