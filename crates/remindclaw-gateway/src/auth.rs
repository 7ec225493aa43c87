//! Operator sessions.
//!
//! `POST /login` trades the configured admin credentials for a random session
//! key; control routes expect it in `x-session-key`, the observer socket in
//! `?sessionKey=`. Keys live in memory and die with the process.

use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::server::AppState;

pub const SESSION_HEADER: &str = "x-session-key";

/// Constant-time comparison so mismatches leak no timing.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[derive(Clone, Default)]
pub struct SessionKeys {
    keys: Arc<Mutex<HashSet<String>>>,
}

impl SessionKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint and remember a new key.
    pub fn issue(&self) -> String {
        let key = uuid::Uuid::new_v4().simple().to_string();
        if let Ok(mut keys) = self.keys.lock() {
            keys.insert(key.clone());
        }
        key
    }

    /// Returns `true` if the key was live.
    pub fn revoke(&self, key: &str) -> bool {
        self.keys.lock().map(|mut k| k.remove(key)).unwrap_or(false)
    }

    pub fn is_valid(&self, key: &str) -> bool {
        let Ok(keys) = self.keys.lock() else {
            return false;
        };
        keys.iter()
            .fold(false, |found, live| found | constant_time_eq(live.as_bytes(), key.as_bytes()))
    }

    pub fn len(&self) -> usize {
        self.keys.lock().map(|k| k.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "message": "Unauthorized" })),
    )
        .into_response()
}

/// Reject requests without a live `x-session-key`.
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.config.require_login {
        return next.run(request).await;
    }
    let key = request
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !key.is_empty() && state.sessions.is_valid(key) {
        return next.run(request).await;
    }
    tracing::warn!("🔒 Rejected {} {}: missing or unknown session key", request.method(), request.uri().path());
    unauthorized()
}
