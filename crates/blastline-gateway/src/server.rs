//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use blastline_channels::receipt::Receipt;
use blastline_core::config::GatewayConfig;
use blastline_engine::SchedulerSweep;
use blastline_store::CampaignDb;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub gateway_config: GatewayConfig,
    /// Campaign and task persistence.
    pub db: Arc<CampaignDb>,
    /// Sweep engine — backs the manual `POST /api/v1/sweep` trigger.
    pub sweep: Arc<SchedulerSweep>,
    /// Receipt inbox feeding the delivery tracker.
    pub receipts: mpsc::Sender<Receipt>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);

    Router::new()
        .route("/health", get(super::routes::health_check))
        .route(
            "/api/v1/campaigns",
            get(super::routes::list_campaigns).post(super::routes::create_campaign),
        )
        .route("/api/v1/campaigns/{id}", get(super::routes::get_campaign))
        .route(
            "/api/v1/campaigns/{id}/cancel",
            post(super::routes::cancel_campaign),
        )
        .route(
            "/api/v1/webhooks/{platform}",
            post(super::routes::platform_webhook),
        )
        .route("/api/v1/sweep", post(super::routes::trigger_sweep))
        .layer({
            let cors = CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
                .max_age(std::time::Duration::from_secs(3600));

            // Restrict CORS origins in production via env var
            if let Ok(origins_str) = std::env::var("BLASTLINE_CORS_ORIGINS") {
                let origins: Vec<_> = origins_str
                    .split(',')
                    .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
                    .collect();
                cors.allow_origin(origins)
            } else {
                cors.allow_origin(Any)
            }
        })
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Bind and serve until the process exits.
pub async fn start(state: AppState) -> anyhow::Result<()> {
    let addr = format!(
        "{}:{}",
        state.gateway_config.host, state.gateway_config.port
    );
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Gateway server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
