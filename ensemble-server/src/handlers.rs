//! REST handlers: network creation and message submission.

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use ensemble_core::OutboundMessage;
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNetworkRequest {
    #[serde(default)]
    pub initial_message: String,
    #[serde(default)]
    pub working_directory: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNetworkResponse {
    pub network_id: String,
    pub main_agent_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub status: &'static str,
    pub agent_id: String,
}

/// `GET /health`
pub async fn health() -> &'static str {
    "OK"
}

/// `POST /api/v1/networks`: create a network with one main agent.
pub async fn create_network(
    State(state): State<AppState>,
    Json(request): Json<CreateNetworkRequest>,
) -> ServerResult<Json<CreateNetworkResponse>> {
    if request.initial_message.trim().is_empty() {
        return Err(ServerError::InvalidRequest(
            "initialMessage is required".to_string(),
        ));
    }
    if request.working_directory.trim().is_empty() {
        return Err(ServerError::InvalidRequest(
            "workingDirectory is required".to_string(),
        ));
    }
    let working_dir = std::fs::canonicalize(&request.working_directory).map_err(|_| {
        ServerError::InvalidRequest(format!(
            "workingDirectory does not exist: {}",
            request.working_directory
        ))
    })?;

    let network = state
        .manager
        .start_new(&request.initial_message, Some(working_dir))
        .await?;
    state.cache.insert(network.clone());

    tracing::info!(network = %network.id, "network created via HTTP");
    Ok(Json(CreateNetworkResponse {
        network_id: network.id.clone(),
        main_agent_id: network.main_agent().id.clone(),
        created_at: network.created_at,
    }))
}

/// `POST /api/v1/networks/:networkId/messages`: send a user message to
/// the network's main agent, resuming the network if necessary.
pub async fn send_message(
    State(state): State<AppState>,
    Path(network_id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> ServerResult<Json<SendMessageResponse>> {
    if request.content.trim().is_empty() {
        return Err(ServerError::InvalidRequest("content is required".to_string()));
    }

    let (network, was_resumed) = state.cache.ensure_active(&state.manager, &network_id).await?;
    if was_resumed {
        tracing::debug!(network = %network_id, "resumed before message delivery");
    }

    let agent_id = network.main_agent().id.clone();
    state
        .manager
        .send_message(&agent_id, OutboundMessage::text(&request.content))
        .await;

    Ok(Json(SendMessageResponse {
        status: "sent",
        agent_id,
    }))
}
