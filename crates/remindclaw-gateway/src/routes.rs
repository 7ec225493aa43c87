//! Control route handlers.

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;

use remindclaw_channels::{StartOutcome, StopOutcome};

use crate::auth::{SESSION_HEADER, constant_time_eq, unauthorized};
use crate::server::AppState;

fn message(status: StatusCode, text: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "message": text.into() }))).into_response()
}

fn ok(text: impl Into<String>) -> Response {
    message(StatusCode::OK, text)
}

fn internal(e: impl std::fmt::Display) -> Response {
    tracing::error!("❌ Request failed: {e}");
    message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "remindclaw-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "observers": state.control.events().observer_count(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Trade admin credentials for a session key.
pub async fn login(State(state): State<Arc<AppState>>, Json(body): Json<LoginRequest>) -> Response {
    let expected_user = state.config.admin_username.as_bytes();
    let expected_pass = state.config.admin_password.as_bytes();
    // An empty configured password disables login.
    let valid = !expected_pass.is_empty()
        & constant_time_eq(body.username.as_bytes(), expected_user)
        & constant_time_eq(body.password.as_bytes(), expected_pass);
    if !valid {
        tracing::warn!("🔒 Failed login for '{}'", body.username);
        return message(StatusCode::UNAUTHORIZED, "Invalid username or password");
    }
    let key = state.sessions.issue();
    tracing::info!("🔑 Operator '{}' logged in", body.username);
    Json(serde_json::json!({ "sessionKey": key })).into_response()
}

pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let key = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !state.sessions.revoke(key) && state.config.require_login {
        return unauthorized();
    }
    ok("Logged out")
}

pub async fn start_bot(State(state): State<Arc<AppState>>) -> Response {
    match state.control.start_cycle().await {
        StartOutcome::Started => ok("Bot started"),
        StartOutcome::AlreadyRunning => message(StatusCode::BAD_REQUEST, "Bot is already running"),
    }
}

pub async fn stop_bot(State(state): State<Arc<AppState>>) -> Response {
    match state.control.stop_cycle().await {
        StopOutcome::Stopped => ok("Bot stopped"),
        StopOutcome::AlreadyStopped => message(StatusCode::BAD_REQUEST, "Bot is not running"),
    }
}

pub async fn status(State(state): State<Arc<AppState>>) -> Response {
    Json(state.control.status()).into_response()
}

pub async fn clear_session(State(state): State<Arc<AppState>>) -> Response {
    match state.control.clear_session().await {
        Ok(()) => ok("Session cleared"),
        Err(e) => internal(e),
    }
}

pub async fn contact_logs(State(state): State<Arc<AppState>>) -> Response {
    Json(state.control.invalid_contacts()).into_response()
}

pub async fn reset_contact_logs(State(state): State<Arc<AppState>>) -> Response {
    state.control.reset_invalid_contacts();
    ok("Contact logs cleared")
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Response {
    match state.control.stats().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => internal(e),
    }
}

pub async fn reset_stats(State(state): State<Arc<AppState>>) -> Response {
    match state.control.reset_stats().await {
        Ok(()) => ok("Stats reset"),
        Err(e) => internal(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

pub async fn search_students(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Response {
    match state.control.search(&query.q).await {
        Ok(hits) => Json(hits).into_response(),
        Err(e) => {
            tracing::error!("❌ Student search failed: {e}");
            message(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}
