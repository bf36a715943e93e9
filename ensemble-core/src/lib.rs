//! # Ensemble
//!
//! The orchestration core of a multi-agent coding assistant. An operator
//! states a goal; a main agent assesses it and may spawn specialized
//! sub-agents (implementation, planning, context collection, testing) that
//! run concurrently, message each other, and call tools through per-agent
//! MCP servers behind a permission gate. Conversations stream to any
//! number of observers as ordered, duplicate-free delta events.
//!
//! ## Architecture
//!
//! - [`network::AgentNetworkManager`] owns networks and the agent → adapter
//!   map. It is the only component that creates or destroys agents.
//! - [`client::ClaudeClient`] owns one backend child process per agent,
//!   parses its NDJSON event stream into [`client::conversation`] snapshots,
//!   and detects turn completion.
//! - [`streaming::StreamCursor`] turns snapshots into per-subscriber delta
//!   events for UIs and WebSocket clients.
//! - [`mcp`] hosts each agent's tool servers on loopback ports from the
//!   process-wide [`ports::PortAllocator`].
//! - [`permission::PermissionGate`] decides every tool invocation against
//!   allow/deny rules and an interactive asker.
//! - [`store`] persists networks and per-project memory atomically.
//!
//! ## Quick start
//!
//! ```ignore
//! use ensemble_core::network::{AgentNetworkManager, ManagerConfig};
//! use ensemble_core::store::{NetworkStore, StorageRoot};
//!
//! # async fn example() -> ensemble_core::Result<()> {
//! let root = StorageRoot::default_root();
//! let project = std::env::current_dir().unwrap();
//! let store = NetworkStore::new(&root, &project);
//!
//! let manager = AgentNetworkManager::new(ManagerConfig::new(&project, store));
//! let network = manager.start_new("Fix the login bug", None).await?;
//!
//! let main_agent = network.main_agent().id.clone();
//! let adapter = manager.adapter(&main_agent).await.unwrap();
//! let mut snapshots = adapter.subscribe();
//! while snapshots.changed().await.is_ok() {
//!     // feed a StreamCursor, render, ...
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod mcp;
pub mod network;
pub mod permission;
pub mod ports;
pub mod store;
pub mod streaming;
pub mod types;

pub use client::{
    Attachment, ClaudeClient, ClaudeConfig, ClientError, OutboundMessage, PermissionMode,
    TurnCompletion, TurnSignal,
};
pub use client::conversation::{
    BackendStatus, Conversation, ConversationMessage, ConversationState, ResponseFragment, Role,
    TokenUsage, ToolInvocation, ToolOutcome,
};
pub use error::{Error, Result};
pub use mcp::{
    AgentContext, DynamicTool, LocalToolServer, McpError, McpFleet, McpServer, ServerCatalog,
    ServerFactory, ToolHandler,
};
pub use network::{AgentNetworkManager, ManagerConfig, NetworkError};
pub use permission::{
    ChannelAsker, DenyAllAsker, LocalSettings, PendingPermission, PermissionAsker,
    PermissionError, PermissionGate, PermissionLists, PermissionRequest, PermissionResponse,
    PermissionRule, PermissionVerdict, RuleSet, Scope, SettingsError,
};
pub use ports::{PortAllocator, PortError, PORT_RANGE_END, PORT_RANGE_START};
pub use store::{MemoryEntry, MemoryStore, NetworkStore, StorageRoot, StoreError};
pub use streaming::{AgentStreamEvent, StreamCursor};
pub use types::{
    new_agent_id, AgentId, AgentMetadata, AgentNetwork, AgentStatus, AgentType, TokenStats,
};
