//! Route table for the ensemble HTTP service.

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::{create_network, health, send_message};
use crate::state::AppState;
use crate::ws::stream_agent;

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/networks", post(create_network))
        .route("/api/v1/networks/:network_id/messages", post(send_message))
        .route(
            "/api/v1/networks/:network_id/agents/:agent_id/stream",
            get(stream_agent),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
