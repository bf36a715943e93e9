//! HTTP/WebSocket frontend for the ensemble orchestrator.
//!
//! Exposes the agent network manager as a multi-client service:
//!
//! - `GET  /health`: liveness probe
//! - `POST /api/v1/networks`: create a network (main agent + first message)
//! - `POST /api/v1/networks/:id/messages`: message the main agent,
//!   resuming the network on demand
//! - `GET  /api/v1/networks/:id/agents/:id/stream`: WebSocket delta stream
//!
//! The service keeps its own persistence root (`~/.ensemble/api`) so it
//! never contends with the terminal UI over state files.

pub mod cache;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;
pub mod ws;

pub use cache::NetworkCache;
pub use error::{ServerError, ServerResult};
pub use router::router;
pub use state::AppState;
