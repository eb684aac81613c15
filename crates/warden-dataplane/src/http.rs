// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP surface of the data-plane.
//!
//! Absent rows surface as 404 with a JSON body; unexpected failures map to
//! 500 without leaking internals. Fan-out endpoints answer 200 when the
//! owning worker acknowledged and 202 when it could not be notified (the
//! worker reconciles on its next poll).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;
use tracing::error;
use warden_core::WardenError;

use crate::fanout::WorkerNotifier;
use crate::store;
use crate::tokens::TokenService;

/// Shared state for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub tokens: Arc<TokenService>,
    pub notifier: WorkerNotifier,
}

/// Error wrapper mapping [`WardenError`] onto HTTP responses.
pub struct ApiError(WardenError);

impl From<WardenError> for ApiError {
    fn from(err: WardenError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            WardenError::Config(_) | WardenError::ConfigMalformed { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "request handler failed");
            // Internals stay in the log.
            (status, Json(json!({ "error": "internal error" }))).into_response()
        } else {
            (status, Json(json!({ "error": self.0.to_string() }))).into_response()
        }
    }
}

fn not_found(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("{what} not found") })),
    )
        .into_response()
}

/// Builds the data-plane router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/bots/active", get(get_active_bots))
        .route("/bots/{bot_id}/config", get(get_bot_config))
        .route("/bots/{bot_id}/entities", get(get_bot_entities))
        .route("/entities/{entity_id}/data", get(get_entity_data))
        .route("/entities/{entity_id}/update", post(post_entity_update))
        .route("/entities/{entity_id}/assign", post(post_entity_assign))
        .route("/entities/{entity_id}/unassign", post(post_entity_unassign))
        .route("/entities/{entity_id}/status", post(post_entity_status))
        .route("/profanity-filter-presets/{preset_id}", get(get_preset))
        .route(
            "/profanity-filter-presets/{preset_id}/refresh",
            post(post_preset_refresh),
        )
        .route(
            "/profanity-filter-config/{entity_id}",
            get(get_profanity_config),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn get_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
struct BotIdEntry {
    bot_id: i64,
}

async fn get_active_bots(State(state): State<AppState>) -> Result<Response, ApiError> {
    let ids = store::active_bot_ids(&state.pool).await?;
    let body: Vec<BotIdEntry> = ids.into_iter().map(|bot_id| BotIdEntry { bot_id }).collect();
    Ok(Json(body).into_response())
}

async fn get_bot_config(
    State(state): State<AppState>,
    Path(bot_id): Path<i64>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let force = params
        .get("force")
        .is_some_and(|v| v == "1" || v == "true");
    match state.tokens.bot_config(&state.pool, bot_id, force).await? {
        Some(config) => Ok(Json(config).into_response()),
        None => Ok(not_found("bot")),
    }
}

async fn get_bot_entities(
    State(state): State<AppState>,
    Path(bot_id): Path<i64>,
) -> Result<Response, ApiError> {
    let entities = store::active_entities_for_bot(&state.pool, bot_id).await?;
    let map: HashMap<String, warden_core::EntityConfig> = entities
        .into_iter()
        .map(|e| (e.guid.clone(), e))
        .collect();
    Ok(Json(map).into_response())
}

async fn get_entity_data(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> Result<Response, ApiError> {
    match store::entity_by_guid(&state.pool, &entity_id).await? {
        Some(entity) => Ok(Json(entity).into_response()),
        None => Ok(not_found("entity")),
    }
}

/// Notifies the worker owning an entity. 200 when acknowledged, 202 when the
/// worker could not be reached, 404 when nothing owns the entity.
async fn fan_out(
    state: &AppState,
    entity_id: &str,
    worker_path: &str,
    body: Option<serde_json::Value>,
) -> Result<Response, ApiError> {
    let Some(bot_id) = store::bot_for_entity(&state.pool, entity_id).await? else {
        return Ok(not_found("entity relation"));
    };
    let delivered = state.notifier.notify(bot_id, worker_path, body).await;
    let status = if delivered {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(json!({ "delivered": delivered }))).into_response())
}

async fn post_entity_update(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> Result<Response, ApiError> {
    fan_out(&state, &entity_id, &format!("/update/{entity_id}"), None).await
}

async fn post_entity_assign(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
    body: Option<Json<serde_json::Value>>,
) -> Result<Response, ApiError> {
    let payload = body.map(|Json(v)| v);
    fan_out(&state, &entity_id, &format!("/assign/{entity_id}"), payload).await
}

async fn post_entity_unassign(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> Result<Response, ApiError> {
    fan_out(&state, &entity_id, &format!("/unassign/{entity_id}"), None).await
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
}

async fn post_entity_status(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
    Json(body): Json<StatusBody>,
) -> Result<Response, ApiError> {
    if body.status != "active" && body.status != "inactive" {
        return Err(WardenError::ConfigMalformed {
            what: format!("status value {}", body.status),
        }
        .into());
    }
    if !store::set_entity_status(&state.pool, &entity_id, &body.status).await? {
        return Ok(not_found("entity"));
    }
    // The owning worker mirrors the change: inactive drops the room,
    // active (re)joins it.
    let worker_path = if body.status == "inactive" {
        format!("/unassign/{entity_id}")
    } else {
        format!("/assign/{entity_id}")
    };
    fan_out(&state, &entity_id, &worker_path, None).await
}

async fn get_preset(
    State(state): State<AppState>,
    Path(preset_id): Path<i64>,
) -> Result<Response, ApiError> {
    match store::preset_by_id(&state.pool, preset_id).await? {
        Some(preset) => Ok(Json(preset).into_response()),
        None => Ok(not_found("preset")),
    }
}

async fn post_preset_refresh(
    State(state): State<AppState>,
    Path(preset_id): Path<i64>,
) -> Result<Response, ApiError> {
    let bot_ids = store::active_bot_ids(&state.pool).await?;
    state
        .notifier
        .broadcast_preset_refresh(&bot_ids, preset_id)
        .await;
    Ok(Json(json!({ "notified": bot_ids.len() })).into_response())
}

async fn get_profanity_config(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> Result<Response, ApiError> {
    match store::profanity_config(&state.pool, &entity_id).await? {
        Some(config) => Ok(Json(config).into_response()),
        None => Ok(not_found("profanity config")),
    }
}
