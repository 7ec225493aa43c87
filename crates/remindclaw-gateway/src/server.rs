//! HTTP server implementation using Axum.

use axum::{
    Router,
    routing::{get, post},
};
use remindclaw_core::config::GatewayConfig;
use remindclaw_scheduler::BotControl;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{SessionKeys, require_session};

/// Shared state for the gateway server.
pub struct AppState {
    pub control: BotControl,
    pub sessions: SessionKeys,
    pub config: GatewayConfig,
    /// Observer ping interval.
    pub heartbeat: Duration,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(control: BotControl, config: GatewayConfig) -> Self {
        Self {
            control,
            sessions: SessionKeys::new(),
            heartbeat: Duration::from_secs(config.heartbeat_secs.max(1)),
            config,
            start_time: std::time::Instant::now(),
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(Any)
        .max_age(Duration::from_secs(3600));
    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<_> = origins
            .iter()
            .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

/// Build the Axum router with all routes.
pub fn build_router(shared: Arc<AppState>) -> Router {
    use crate::routes;

    // Protected routes: require a live session key
    let protected = Router::new()
        .route("/logout", post(routes::logout))
        .route("/start-bot", post(routes::start_bot))
        .route("/stop-bot", post(routes::stop_bot))
        .route("/status", get(routes::status))
        .route("/clear-session", post(routes::clear_session))
        .route("/contact-logs", get(routes::contact_logs))
        .route("/reset-contact-logs", post(routes::reset_contact_logs))
        .route("/stats", get(routes::stats))
        .route("/reset-stats", post(routes::reset_stats))
        .route("/search-students", get(routes::search_students))
        .route_layer(axum::middleware::from_fn_with_state(
            shared.clone(),
            require_session,
        ));

    // Public routes; /ws checks its own query key before upgrading
    let public = Router::new()
        .route("/health", get(routes::health_check))
        .route("/login", post(routes::login))
        .route("/ws", get(crate::ws::ws_handler));

    protected
        .merge(public)
        .layer(cors_layer(&shared.config.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Serve until the process is interrupted, then stop the bot.
pub async fn start(control: BotControl, config: &GatewayConfig) -> anyhow::Result<()> {
    if config.require_login && config.admin_password.is_empty() {
        tracing::warn!("⚠️ No admin password configured, login is disabled");
    }
    let state = Arc::new(AppState::new(control.clone(), config.clone()));
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("🛑 Shutdown requested");
        })
        .await?;

    control.stop_cycle().await;
    Ok(())
}
