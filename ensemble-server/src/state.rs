//! Shared application state.

use std::sync::Arc;

use ensemble_core::AgentNetworkManager;

use crate::cache::NetworkCache;

/// State cloned into every request handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<AgentNetworkManager>,
    pub cache: Arc<NetworkCache>,
}

impl AppState {
    pub fn new(manager: Arc<AgentNetworkManager>, cache: Arc<NetworkCache>) -> Self {
        Self { manager, cache }
    }
}
