//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};
use remarket_core::config::GatewayConfig;
use remarket_scheduler::{CampaignDb, ProgressBus, SchedulerSet};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub gateway_config: GatewayConfig,
    pub start_time: std::time::Instant,
    /// Per-tenant scheduler actors.
    pub schedulers: Arc<SchedulerSet>,
    /// Campaign, recipient, and bot rows.
    pub campaigns: Arc<CampaignDb>,
    /// Fan-out bus the WebSocket endpoint subscribes to.
    pub progress: ProgressBus,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);

    let api = Router::new()
        .route("/api/v1/info", get(super::routes::system_info))
        .route("/api/v1/jobs", post(super::routes::schedule_job))
        .route(
            "/api/v1/tenants/{tenant_id}/jobs",
            get(super::routes::list_jobs),
        )
        .route(
            "/api/v1/tenants/{tenant_id}/jobs/{job_id}",
            delete(super::routes::cancel_job),
        )
        .route(
            "/api/v1/tenants/{tenant_id}/jobs/{job_id}/log",
            get(super::routes::job_log),
        )
        .route("/api/v1/bots", post(super::routes::register_bot))
        .route("/api/v1/campaigns", post(super::routes::create_campaign))
        .route(
            "/api/v1/campaigns/{campaign_id}",
            get(super::routes::campaign_status),
        )
        .route(
            "/api/v1/campaigns/{campaign_id}/start",
            post(super::routes::start_campaign),
        )
        .route("/ws", get(super::ws::ws_handler));

    let public = Router::new().route("/health", get(super::routes::health_check));

    api.merge(public)
        .layer(
            CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server. Blocks until the listener fails.
pub async fn start(state: AppState) -> anyhow::Result<()> {
    let addr = format!(
        "{}:{}",
        state.gateway_config.host, state.gateway_config.port
    );
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("gateway listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
