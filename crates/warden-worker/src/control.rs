// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Worker control surface on `127.0.0.1:(4000 + bot_id)`.
//!
//! Handlers forward typed events into the actor and wait briefly for the
//! actor to apply them; when the actor is busy past the wait, 202 signals
//! "accepted but not synchronously confirmed".

use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;
use tracing::info;
use warden_core::{EntityConfig, WardenError, jid};

/// Wait for the actor to confirm a control event before answering 202.
const ACK_WAIT: Duration = Duration::from_secs(5);

/// Events the control surface (and the data-plane fan-out behind it) sends
/// into the worker actor.
#[derive(Debug)]
pub enum ControlEvent {
    /// Add an entity to the map and join its room.
    Assign {
        entity_id: String,
        data: Option<EntityConfig>,
        ack: Option<oneshot::Sender<()>>,
    },
    /// Drop an entity, leave its room, start the unassign debounce.
    Unassign {
        entity_id: String,
        ack: Option<oneshot::Sender<()>>,
    },
    /// Re-fetch an entity's data and reconfigure its moderation.
    Update {
        entity_id: String,
        ack: Option<oneshot::Sender<()>>,
    },
    /// Refresh a cached preset and invalidate compiled patterns.
    RefreshPreset {
        preset_id: i64,
        ack: Option<oneshot::Sender<()>>,
    },
    /// Read-only reconnection diagnostics.
    Diagnostics {
        reply: oneshot::Sender<serde_json::Value>,
    },
    /// Set the shutdown flag; the process exits shortly.
    Exit,
}

#[derive(Clone)]
struct ControlState {
    tx: mpsc::Sender<ControlEvent>,
}

#[derive(Debug, Deserialize, Default)]
struct AssignBody {
    #[serde(default, rename = "entityData")]
    entity_data: Option<EntityConfig>,
}

/// Builds the control router.
pub fn router(tx: mpsc::Sender<ControlEvent>) -> Router {
    Router::new()
        .route("/assign/{entity_id}", post(post_assign))
        .route("/unassign/{entity_id}", post(post_unassign))
        .route("/update/{entity_id}", post(post_update))
        .route("/refresh-preset/{preset_id}", post(post_refresh_preset))
        .route("/reconnection-state", get(get_reconnection_state))
        .route("/exit-process", post(post_exit))
        .layer(TraceLayer::new_for_http())
        .with_state(ControlState { tx })
}

/// Binds the control surface. A port already in use is a startup error:
/// another worker for this bot is alive, and exactly one may be.
pub async fn bind(bot_id: i64) -> Result<tokio::net::TcpListener, WardenError> {
    let port = jid::worker_port(bot_id)?;
    let addr = format!("127.0.0.1:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| WardenError::Config(format!("control port {addr} unavailable: {e}")))?;
    info!(%addr, "control surface listening");
    Ok(listener)
}

/// Serves the control surface until the process exits.
pub async fn serve(
    listener: tokio::net::TcpListener,
    tx: mpsc::Sender<ControlEvent>,
) -> Result<(), WardenError> {
    axum::serve(listener, router(tx))
        .await
        .map_err(|e| WardenError::Internal(format!("control server error: {e}")))
}

/// Sends an event and waits for the actor's ack.
async fn dispatch(
    state: &ControlState,
    make_event: impl FnOnce(oneshot::Sender<()>) -> ControlEvent,
) -> Response {
    let (ack_tx, ack_rx) = oneshot::channel();
    if state.tx.send(make_event(ack_tx)).await.is_err() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "worker actor not running" })),
        )
            .into_response();
    }
    match tokio::time::timeout(ACK_WAIT, ack_rx).await {
        Ok(Ok(())) => (StatusCode::OK, Json(json!({ "ok": true }))).into_response(),
        // Actor busy or ack dropped: the event is queued and will apply.
        _ => (StatusCode::ACCEPTED, Json(json!({ "queued": true }))).into_response(),
    }
}

async fn post_assign(
    State(state): State<ControlState>,
    Path(entity_id): Path<String>,
    body: Option<Json<AssignBody>>,
) -> Response {
    let data = body.and_then(|Json(b)| b.entity_data);
    dispatch(&state, |ack| ControlEvent::Assign {
        entity_id,
        data,
        ack: Some(ack),
    })
    .await
}

async fn post_unassign(
    State(state): State<ControlState>,
    Path(entity_id): Path<String>,
) -> Response {
    dispatch(&state, |ack| ControlEvent::Unassign {
        entity_id,
        ack: Some(ack),
    })
    .await
}

async fn post_update(
    State(state): State<ControlState>,
    Path(entity_id): Path<String>,
) -> Response {
    dispatch(&state, |ack| ControlEvent::Update {
        entity_id,
        ack: Some(ack),
    })
    .await
}

async fn post_refresh_preset(
    State(state): State<ControlState>,
    Path(preset_id): Path<i64>,
) -> Response {
    dispatch(&state, |ack| ControlEvent::RefreshPreset {
        preset_id,
        ack: Some(ack),
    })
    .await
}

async fn get_reconnection_state(State(state): State<ControlState>) -> Response {
    let (reply_tx, reply_rx) = oneshot::channel();
    if state.tx.send(ControlEvent::Diagnostics { reply: reply_tx }).await.is_err() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "worker actor not running" })),
        )
            .into_response();
    }
    match tokio::time::timeout(ACK_WAIT, reply_rx).await {
        Ok(Ok(diagnostics)) => (StatusCode::OK, Json(diagnostics)).into_response(),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "diagnostics unavailable" })),
        )
            .into_response(),
    }
}

async fn post_exit(State(state): State<ControlState>) -> Response {
    let _ = state.tx.send(ControlEvent::Exit).await;
    (StatusCode::OK, Json(json!({ "exiting": true }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn assign_body_accepts_entity_data() {
        let raw = r#"{"entityData":{"guid":"e1","name":"Lobby","entity_type":"community"}}"#;
        let body: AssignBody = serde_json::from_str(raw).unwrap();
        assert_eq!(body.entity_data.unwrap().guid, "e1");

        let empty: AssignBody = serde_json::from_str("{}").unwrap();
        assert!(empty.entity_data.is_none());
    }

    #[tokio::test]
    async fn dispatch_times_out_to_accepted() {
        // An actor that never acks: the handler answers 202.
        let (tx, mut rx) = mpsc::channel(4);
        let state = ControlState { tx };
        let drain = tokio::spawn(async move {
            // Receive but drop the ack sender.
            let _ = rx.recv().await;
        });

        // The dropped ack sender resolves the wait immediately.
        let response = dispatch(&state, |ack| ControlEvent::Unassign {
            entity_id: "e1".into(),
            ack: Some(ack),
        })
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        drain.await.unwrap();
    }

    #[tokio::test]
    async fn dispatch_acks_to_ok() {
        let (tx, mut rx) = mpsc::channel(4);
        let state = ControlState { tx };
        let actor = tokio::spawn(async move {
            if let Some(ControlEvent::Unassign { ack: Some(ack), .. }) = rx.recv().await {
                let _ = ack.send(());
            }
        });

        let response = dispatch(&state, |ack| ControlEvent::Unassign {
            entity_id: "e1".into(),
            ack: Some(ack),
        })
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        actor.await.unwrap();
    }
}
