//! WebSocket streaming: one socket per agent.
//!
//! Frames are JSON objects of the shape
//! `{type, agentId, agentType, agentName?, taskName?, data}`. The socket
//! opens with a plain `connected` frame, then (after a short settle delay
//! that lets same-tick subscribers see the first event) the structured
//! event stream. Client-to-server frames are ignored; messages flow
//! through the REST endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use ensemble_core::{
    AgentMetadata, AgentNetworkManager, AgentStreamEvent, ClaudeClient, StreamCursor, TurnSignal,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::error::ServerError;
use crate::state::AppState;

/// Settle delay before the initial status event; a subscriber attaching in
/// the same scheduling quantum as the first emission would otherwise miss
/// it.
const SUBSCRIBE_SETTLE: Duration = Duration::from_millis(10);

type WsSender = SplitSink<WebSocket, Message>;
type WsReceiver = SplitStream<WebSocket>;

/// `GET /api/v1/networks/:networkId/agents/:agentId/stream`
pub async fn stream_agent(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((network_id, agent_id)): Path<(String, String)>,
) -> Result<Response, ServerError> {
    let (network, _) = state.cache.ensure_active(&state.manager, &network_id).await?;
    let meta = network
        .agent(&agent_id)
        .cloned()
        .ok_or_else(|| ServerError::NotFound(format!("agent not found: {agent_id}")))?;
    let adapter = state
        .manager
        .adapter(&agent_id)
        .await
        .ok_or_else(|| ServerError::NotFound(format!("agent not found: {agent_id}")))?;

    Ok(ws.on_upgrade(move |socket| {
        handle_stream(socket, state.manager.clone(), network_id, meta, adapter)
    }))
}

async fn handle_stream(
    socket: WebSocket,
    manager: Arc<AgentNetworkManager>,
    network_id: String,
    initial_meta: AgentMetadata,
    adapter: Arc<ClaudeClient>,
) {
    let agent_id = initial_meta.id.clone();
    tracing::debug!(network = %network_id, agent = %agent_id, "stream attached");
    let (mut sender, mut receiver) = socket.split();

    let bootstrap = json!({
        "type": "connected",
        "networkId": network_id,
        "agentId": agent_id,
    });
    if send_json(&mut sender, &bootstrap).await.is_err() {
        return;
    }

    tokio::time::sleep(SUBSCRIBE_SETTLE).await;

    let mut snapshots = adapter.subscribe();
    let mut turns = adapter.on_turn_complete();
    let mut cursor = StreamCursor::new();

    let mut pending = vec![AgentStreamEvent::Status {
        status: "connected".to_string(),
    }];
    pending.extend(cursor.catch_up(&snapshots.borrow_and_update().clone()));
    if flush(&mut sender, &manager, &initial_meta, pending).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let convo = snapshots.borrow_and_update().clone();
                let events = cursor.advance(&convo);
                if flush(&mut sender, &manager, &initial_meta, events).await.is_err() {
                    break;
                }
            }
            signal = turns.recv() => {
                match signal {
                    Ok(TurnSignal::Completed(_)) => {
                        // The closing snapshot is published before the turn
                        // signal; drain it so tool events precede done.
                        let convo = snapshots.borrow_and_update().clone();
                        let mut events = cursor.advance(&convo);
                        events.push(AgentStreamEvent::Done);
                        if flush(&mut sender, &manager, &initial_meta, events).await.is_err() {
                            break;
                        }
                    }
                    Ok(TurnSignal::Closed { cancelled }) => {
                        // An errored close (startup failure, child death)
                        // surfaces its error event but no done frame; only
                        // a deliberate cancellation reads as a finished
                        // turn.
                        let convo = snapshots.borrow_and_update().clone();
                        let mut events = cursor.advance(&convo);
                        if cancelled {
                            events.push(AgentStreamEvent::Done);
                        }
                        let _ = flush(&mut sender, &manager, &initial_meta, events).await;
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(agent = %initial_meta.id, skipped, "stream lagged on turn channel");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            frame = next_inbound(&mut receiver) => {
                // Inbound frames are ignored; a close or error detaches.
                if frame.is_none() {
                    break;
                }
            }
        }
    }

    // Dropping `snapshots` and `turns` detaches both subscriptions; the
    // agent itself keeps running.
    tracing::debug!(agent = %initial_meta.id, "stream detached");
}

/// The next non-close inbound frame, or None when the client is gone.
async fn next_inbound(receiver: &mut WsReceiver) -> Option<Message> {
    match receiver.next().await {
        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => None,
        Some(Ok(frame)) => Some(frame),
    }
}

async fn flush(
    sender: &mut WsSender,
    manager: &Arc<AgentNetworkManager>,
    initial_meta: &AgentMetadata,
    events: Vec<AgentStreamEvent>,
) -> Result<(), axum::Error> {
    if events.is_empty() {
        return Ok(());
    }
    // Names and task labels can change mid-stream; prefer live metadata.
    let meta = manager
        .agent_metadata(&initial_meta.id)
        .await
        .unwrap_or_else(|| initial_meta.clone());
    for event in events {
        send_json(sender, &envelope(&meta, &event)).await?;
    }
    Ok(())
}

fn envelope(meta: &AgentMetadata, event: &AgentStreamEvent) -> Value {
    json!({
        "type": event.event_type(),
        "agentId": meta.id,
        "agentType": meta.agent_type.as_str(),
        "agentName": meta.name,
        "taskName": meta.task_name,
        "data": event.data(),
    })
}

async fn send_json(sender: &mut WsSender, value: &Value) -> Result<(), axum::Error> {
    sender.send(Message::Text(value.to_string())).await
}
