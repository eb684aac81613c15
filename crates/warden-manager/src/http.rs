// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Manager health/restart HTTP surface.

use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;
use warden_core::WardenError;

use crate::supervisor::SupervisorEvent;

/// Wait for the supervisor to answer a query.
const REPLY_WAIT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct ManagerState {
    tx: mpsc::Sender<SupervisorEvent>,
}

#[derive(Debug, Deserialize)]
struct RestartBody {
    #[serde(rename = "botId")]
    bot_id: i64,
}

/// Builds the manager router.
pub fn router(tx: mpsc::Sender<SupervisorEvent>) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/status", get(get_status))
        .route("/restart-bot", post(post_restart_bot))
        .layer(TraceLayer::new_for_http())
        .with_state(ManagerState { tx })
}

/// Binds and serves the manager surface.
pub async fn serve(port: u16, tx: mpsc::Sender<SupervisorEvent>) -> Result<(), WardenError> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| WardenError::Config(format!("failed to bind manager to {addr}: {e}")))?;
    tracing::info!(%addr, "manager surface listening");
    axum::serve(listener, router(tx))
        .await
        .map_err(|e| WardenError::Internal(format!("manager server error: {e}")))
}

async fn query(
    state: &ManagerState,
    make_event: impl FnOnce(oneshot::Sender<serde_json::Value>) -> SupervisorEvent,
) -> Response {
    let (reply_tx, reply_rx) = oneshot::channel();
    if state.tx.send(make_event(reply_tx)).await.is_err() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "supervisor not running" })),
        )
            .into_response();
    }
    match tokio::time::timeout(REPLY_WAIT, reply_rx).await {
        Ok(Ok(value)) => (StatusCode::OK, Json(value)).into_response(),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "supervisor did not answer" })),
        )
            .into_response(),
    }
}

async fn get_health(State(state): State<ManagerState>) -> Response {
    query(&state, |reply| SupervisorEvent::Health { reply }).await
}

async fn get_status(State(state): State<ManagerState>) -> Response {
    query(&state, |reply| SupervisorEvent::Status { reply }).await
}

async fn post_restart_bot(
    State(state): State<ManagerState>,
    Json(body): Json<RestartBody>,
) -> Response {
    let (reply_tx, reply_rx) = oneshot::channel();
    let event = SupervisorEvent::RestartBot {
        bot_id: body.bot_id,
        reply: reply_tx,
    };
    if state.tx.send(event).await.is_err() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "success": false, "error": "supervisor not running" })),
        )
            .into_response();
    }
    match tokio::time::timeout(REPLY_WAIT, reply_rx).await {
        Ok(Ok(Ok(message))) => {
            (StatusCode::OK, Json(json!({ "success": true, "message": message }))).into_response()
        }
        Ok(Ok(Err(error))) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "success": false, "error": error })),
        )
            .into_response(),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "success": false, "error": "supervisor did not answer" })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_body_uses_camel_case() {
        let body: RestartBody = serde_json::from_str(r#"{"botId": 12}"#).unwrap();
        assert_eq!(body.bot_id, 12);
        assert!(serde_json::from_str::<RestartBody>(r#"{"bot_id": 12}"#).is_err());
    }

    #[tokio::test]
    async fn health_round_trips_through_the_supervisor() {
        let (tx, mut rx) = mpsc::channel(4);
        let actor = tokio::spawn(async move {
            if let Some(SupervisorEvent::Health { reply }) = rx.recv().await {
                let _ = reply.send(json!({ "status": "ok" }));
            }
        });

        let state = ManagerState { tx };
        let response = query(&state, |reply| SupervisorEvent::Health { reply }).await;
        assert_eq!(response.status(), StatusCode::OK);
        actor.await.unwrap();
    }
}
