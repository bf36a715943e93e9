//! Permission system for tool execution.
//!
//! Every tool invocation an agent's backend proposes is routed through a
//! [`PermissionGate`]. Rules come from the project-local settings file and
//! from decisions the user makes at runtime:
//!
//! - **[`PermissionGate`]**: ordered deny / allow / ask evaluation
//! - **[`PermissionRule`] / [`RuleSet`]**: `ToolName(argGlob)` matching
//! - **[`PermissionAsker`]**: UI hook producing interactive decisions
//! - **[`ChannelAsker`]**: asker resolved over a request/response channel
//! - **[`LocalSettings`]**: `.claude/settings.local.json` persistence
//!
//! Shell invocations decompose into pipeline sub-commands; each must be
//! covered by an allow rule before the whole call passes without asking.

mod gate;
mod rules;
mod settings;

pub use gate::{
    ChannelAsker, DenyAllAsker, PendingPermission, PermissionAsker, PermissionError,
    PermissionGate, PermissionRequest, PermissionResponse, PermissionVerdict, Scope,
};
pub use rules::{
    is_safe_cd, is_write_tool, primary_parameter, split_shell_command, PermissionRule,
    RuleParseError, RuleSet,
};
pub use settings::{LocalSettings, PermissionLists, SettingsError};
