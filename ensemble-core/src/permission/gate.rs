//! The permission gate: one decision per tool invocation.
//!
//! Every tool call an agent's backend wants to make passes through
//! [`PermissionGate::check`]. The gate evaluates, in order: the deny list,
//! the allow list (static rules plus rules accumulated this session), and
//! finally the UI-provided asker. The user's answer carries a scope that
//! decides whether it applies once, for the rest of the session, or
//! persistently via the project settings file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};
use uuid::Uuid;

use super::rules::{
    is_safe_cd, is_write_tool, primary_parameter, split_shell_command, PermissionRule, RuleSet,
};
use super::settings::{LocalSettings, PermissionLists};
use crate::types::AgentId;

/// How long an allow decision lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Scope {
    /// This single invocation only.
    Once,
    /// Until the network is destroyed; in-memory only.
    Session,
    /// Written to the project's settings file.
    Persistent,
}

/// A tool invocation awaiting a verdict.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    pub tool_name: String,
    pub parameters: Value,
    pub agent_id: AgentId,
    pub cwd: PathBuf,
}

/// Answer to a permission request.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PermissionResponse {
    Allow { scope: Scope },
    Deny { reason: String },
    /// Defer: no standing decision. The gate treats this as a denial of the
    /// current invocation without recording anything.
    Ask,
}

/// Final verdict for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionVerdict {
    Allowed,
    Denied { reason: String },
}

impl PermissionVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PermissionVerdict::Allowed)
    }
}

/// Errors from resolving pending permission requests.
#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("no pending permission request with id {0}")]
    RequestNotFound(String),
    #[error("permission response channel closed")]
    ChannelClosed,
}

/// Source of interactive permission decisions.
///
/// Implementations may be called concurrently; each call suspends its own
/// tool invocation until an answer arrives.
#[async_trait]
pub trait PermissionAsker: Send + Sync {
    async fn ask(&self, request: PermissionRequest) -> PermissionResponse;
}

/// Asker that denies everything. The default for non-interactive use.
pub struct DenyAllAsker;

#[async_trait]
impl PermissionAsker for DenyAllAsker {
    async fn ask(&self, _request: PermissionRequest) -> PermissionResponse {
        PermissionResponse::Deny {
            reason: "no interactive approver configured".to_string(),
        }
    }
}

/// A permission request surfaced to the UI, paired with its id.
#[derive(Debug)]
pub struct PendingPermission {
    pub id: String,
    pub request: PermissionRequest,
}

/// Asker that forwards requests over a channel and suspends until
/// [`ChannelAsker::resolve`] is called with the matching id.
pub struct ChannelAsker {
    requests_tx: mpsc::UnboundedSender<PendingPermission>,
    pending: RwLock<HashMap<String, oneshot::Sender<PermissionResponse>>>,
}

impl ChannelAsker {
    /// Create an asker and the receiver the UI drains requests from.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<PendingPermission>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                requests_tx: tx,
                pending: RwLock::new(HashMap::new()),
            }),
            rx,
        )
    }

    /// Deliver a response for an outstanding request.
    pub async fn resolve(
        &self,
        id: &str,
        response: PermissionResponse,
    ) -> Result<(), PermissionError> {
        let tx = self
            .pending
            .write()
            .await
            .remove(id)
            .ok_or_else(|| PermissionError::RequestNotFound(id.to_string()))?;
        tx.send(response).map_err(|_| PermissionError::ChannelClosed)
    }
}

#[async_trait]
impl PermissionAsker for ChannelAsker {
    async fn ask(&self, request: PermissionRequest) -> PermissionResponse {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(id.clone(), tx);

        if self.requests_tx.send(PendingPermission { id: id.clone(), request }).is_err() {
            self.pending.write().await.remove(&id);
            return PermissionResponse::Deny {
                reason: "permission channel closed".to_string(),
            };
        }

        match rx.await {
            Ok(response) => response,
            Err(_) => PermissionResponse::Deny {
                reason: "permission request abandoned".to_string(),
            },
        }
    }
}

/// Gate configuration and state for one network.
pub struct PermissionGate {
    deny: RuleSet,
    allow: RwLock<RuleSet>,
    session_allow: RwLock<RuleSet>,
    asker: Arc<dyn PermissionAsker>,
    settings: LocalSettings,
    worktree: Option<PathBuf>,
}

impl PermissionGate {
    /// Build a gate from explicit rule lists.
    pub fn new(
        lists: PermissionLists,
        asker: Arc<dyn PermissionAsker>,
        settings: LocalSettings,
        worktree: Option<PathBuf>,
    ) -> Self {
        Self {
            deny: RuleSet::parse_lenient(&lists.deny),
            allow: RwLock::new(RuleSet::parse_lenient(&lists.allow)),
            session_allow: RwLock::new(RuleSet::default()),
            asker,
            settings,
            worktree,
        }
    }

    /// Build a gate whose rule lists come from the project settings file.
    pub fn for_project(
        project_dir: impl Into<PathBuf>,
        asker: Arc<dyn PermissionAsker>,
    ) -> Self {
        let project_dir = project_dir.into();
        let settings = LocalSettings::for_project(&project_dir);
        let lists = settings.permission_lists();
        Self::new(lists, asker, settings, Some(project_dir))
    }

    /// Decide one tool invocation.
    pub async fn check(&self, request: &PermissionRequest) -> PermissionVerdict {
        let primary = primary_parameter(&request.tool_name, &request.parameters);

        if self.matches_deny(request, primary.as_deref()) {
            return PermissionVerdict::Denied {
                reason: "matched deny rule".to_string(),
            };
        }

        if self
            .matches_allow(&*self.allow.read().await, request, primary.as_deref())
            || self.matches_allow(&*self.session_allow.read().await, request, primary.as_deref())
        {
            return PermissionVerdict::Allowed;
        }

        match self.asker.ask(request.clone()).await {
            PermissionResponse::Allow { scope } => {
                self.record_allow(request, primary.as_deref(), scope).await;
                PermissionVerdict::Allowed
            }
            PermissionResponse::Deny { reason } => PermissionVerdict::Denied { reason },
            PermissionResponse::Ask => PermissionVerdict::Denied {
                reason: "permission requires interactive approval".to_string(),
            },
        }
    }

    fn matches_deny(&self, request: &PermissionRequest, primary: Option<&str>) -> bool {
        if request.tool_name == "Bash" {
            if let Some(command) = primary {
                return split_shell_command(command)
                    .iter()
                    .any(|sub| self.deny.matches("Bash", Some(sub)));
            }
        }
        self.deny.matches(&request.tool_name, primary)
    }

    /// Allow-list semantics: a shell call is covered only when every
    /// sub-command matches a rule (safe `cd`s inside the worktree excepted).
    fn matches_allow(
        &self,
        rules: &RuleSet,
        request: &PermissionRequest,
        primary: Option<&str>,
    ) -> bool {
        if request.tool_name == "Bash" {
            let Some(command) = primary else { return false };
            let subs = split_shell_command(command);
            if subs.is_empty() {
                return false;
            }
            return subs.iter().all(|sub| {
                rules.matches("Bash", Some(sub)) || self.is_safe_cd_sub(sub, request)
            });
        }
        rules.matches(&request.tool_name, primary)
    }

    fn is_safe_cd_sub(&self, sub: &str, request: &PermissionRequest) -> bool {
        self.worktree
            .as_deref()
            .map(|worktree| is_safe_cd(sub, &request.cwd, worktree))
            .unwrap_or(false)
    }

    async fn record_allow(&self, request: &PermissionRequest, primary: Option<&str>, scope: Scope) {
        let rule_text = match primary {
            Some(arg) => format!("{}({})", request.tool_name, arg),
            None => request.tool_name.clone(),
        };
        let Ok(rule) = PermissionRule::parse(&rule_text) else {
            tracing::warn!("could not form permission rule from {rule_text:?}");
            return;
        };

        // Write tools never escalate past the session cache.
        let effective = if is_write_tool(&request.tool_name) && scope == Scope::Persistent {
            Scope::Session
        } else {
            scope
        };

        match effective {
            Scope::Once => {}
            Scope::Session => self.session_allow.write().await.push(rule),
            Scope::Persistent => {
                if let Err(e) = self.settings.add_to_allow_list(&rule_text) {
                    tracing::error!("failed to persist allow rule {rule_text:?}: {e}");
                }
                self.allow.write().await.push(rule);
            }
        }
    }
}
