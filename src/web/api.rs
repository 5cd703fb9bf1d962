// src/web/api.rs
// REST handlers for the control plane
//
// All platform ids cross the wire as decimal strings so JS clients can't
// round them through f64.

use super::state::AppState;
use crate::store::{MessageRecord, ThreadRecord, UserRecord};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::error;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    error!("Control plane error: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn parse_id(raw: &str) -> Result<i64, Response> {
    raw.parse::<i64>()
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, format!("invalid id {raw:?}")))
}

fn user_json(user: &UserRecord) -> serde_json::Value {
    json!({
        "id": user.id.to_string(),
        "name": user.name,
        "username": user.username,
        "profilePicture": user.profile_picture,
        "isAdmin": user.is_admin,
        "isBlocked": user.is_blocked,
        "firstSeen": user.first_seen,
        "updatedAt": user.updated_at,
    })
}

fn thread_json(thread: &ThreadRecord) -> serde_json::Value {
    json!({
        "id": thread.id.to_string(),
        "name": thread.name,
        "isGroup": thread.is_group,
        "prefix": thread.prefix,
        "language": thread.language,
        "enabled": thread.enabled,
        "createdAt": thread.created_at,
        "updatedAt": thread.updated_at,
    })
}

fn message_json(message: &MessageRecord) -> serde_json::Value {
    json!({
        "id": message.id,
        "threadId": message.thread_id.to_string(),
        "senderId": message.sender_id.to_string(),
        "text": message.text,
        "isE2ee": message.is_e2ee,
        "timestampMs": message.timestamp_ms.to_string(),
        "createdAt": message.created_at,
    })
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

// ── Health & metrics ──────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "uptime": state.metrics.uptime_secs(),
    }))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

pub async fn overview(State(state): State<AppState>) -> Response {
    let snapshot = state.metrics.snapshot();
    let store_stats = match state.store.stats() {
        Ok(stats) => stats,
        Err(e) => return internal_error(e),
    };
    let counter = |name: &str| snapshot.counters.get(name).copied().unwrap_or(0);
    Json(json!({
        "uptime": snapshot.uptime_secs,
        "events": {
            "received": counter("events.received"),
            "deduplicated": counter("events.deduplicated"),
            "blocked": counter("events.blocked"),
            "dropped": counter("events.dropped"),
        },
        "messaging": {
            "received": counter("messages.received"),
            "sent": counter("messages.sent"),
            "safetyBlocks": counter("safety.blocks"),
        },
        "errors": {
            "handler": counter("errors.handler"),
            "transport": counter("errors.transport"),
        },
        "handlersActive": snapshot.gauges.get("handlers.active").copied().unwrap_or(0),
        "memory": snapshot.memory,
        "store": store_stats,
    }))
    .into_response()
}

// ── Users ─────────────────────────────────────────────────────────────

pub async fn list_users(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Response {
    match state.store.list_users(page.limit.min(200), page.offset) {
        Ok(users) => {
            Json(json!({ "users": users.iter().map(user_json).collect::<Vec<_>>() }))
                .into_response()
        }
        Err(e) => internal_error(e),
    }
}

pub async fn get_user(State(state): State<AppState>, Path(raw_id): Path<String>) -> Response {
    let id = match parse_id(&raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.store.get_user(id) {
        Ok(Some(user)) => Json(user_json(&user)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "user not found"),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct BlockBody {
    pub blocked: bool,
}

pub async fn set_user_blocked(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    Json(body): Json<BlockBody>,
) -> Response {
    let id = match parse_id(&raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.store.set_blocked(id, body.blocked) {
        Ok(()) => Json(json!({ "ok": true, "id": id.to_string(), "blocked": body.blocked }))
            .into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct AdminBody {
    pub admin: bool,
}

pub async fn set_user_admin(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    Json(body): Json<AdminBody>,
) -> Response {
    let id = match parse_id(&raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.store.set_admin(id, body.admin) {
        Ok(()) => {
            Json(json!({ "ok": true, "id": id.to_string(), "admin": body.admin })).into_response()
        }
        Err(e) => internal_error(e),
    }
}

// ── Threads & messages ────────────────────────────────────────────────

pub async fn list_threads(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Response {
    match state.store.list_threads(page.limit.min(200), page.offset) {
        Ok(threads) => {
            Json(json!({ "threads": threads.iter().map(thread_json).collect::<Vec<_>>() }))
                .into_response()
        }
        Err(e) => internal_error(e),
    }
}

pub async fn get_thread(State(state): State<AppState>, Path(raw_id): Path<String>) -> Response {
    let id = match parse_id(&raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.store.get_thread(id) {
        Ok(Some(thread)) => Json(thread_json(&thread)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "thread not found"),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub thread: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

pub async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
) -> Response {
    let Some(raw_thread) = query.thread else {
        return error_response(StatusCode::BAD_REQUEST, "thread query parameter is required");
    };
    let thread_id = match parse_id(&raw_thread) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.store.get_messages(thread_id, query.limit.min(200)) {
        Ok(messages) => {
            Json(json!({ "messages": messages.iter().map(message_json).collect::<Vec<_>>() }))
                .into_response()
        }
        Err(e) => internal_error(e),
    }
}

// ── Environment editing ───────────────────────────────────────────────

pub async fn get_env(State(state): State<AppState>) -> Response {
    Json(json!({ "env": state.config.editable_env() })).into_response()
}

pub async fn update_env(
    State(state): State<AppState>,
    Json(updates): Json<BTreeMap<String, String>>,
) -> Response {
    match state.config.update_env(&updates) {
        Ok(applied) => Json(json!({ "ok": true, "applied": applied })).into_response(),
        Err(e) => internal_error(e),
    }
}
