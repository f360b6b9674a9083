//! HTTP admin API
//!
//! A small REST surface over the agent: route management, client start/stop,
//! and config updates. Mounted by the CLI on the configured admin port and
//! meant for localhost use.

pub mod handlers;
pub mod models;

use axum::routing::{get, post, put};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use tunneller_agent::TunnelClient;

/// State shared across handlers
pub struct AppState {
    pub client: Arc<TunnelClient>,
}

/// Build the admin router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/routes", get(handlers::list_routes).post(handlers::add_route))
        .route(
            "/routes/:index",
            put(handlers::update_route).delete(handlers::delete_route),
        )
        .route("/client/start", post(handlers::start_client))
        .route("/client/stop", post(handlers::stop_client))
        .route("/status", get(handlers::status))
        .route("/stats", get(handlers::stats))
        .route("/config", get(handlers::get_config))
        .route("/config/domain", put(handlers::update_domain))
        .route("/config/signal", put(handlers::update_signal))
        .route("/config/mode", put(handlers::update_mode))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until the process exits
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Admin API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
