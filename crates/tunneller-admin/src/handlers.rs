//! Admin API handlers
//!
//! Mutations validate at this boundary and reject with 400 before anything
//! reaches the config store; successful mutations are persisted when
//! auto-save is on.

use crate::models::*;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;
use tracing::{debug, warn};
use tunneller_agent::{AgentConfig, ConfigManager};
use tunneller_router::RoutingRule;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(error: impl std::fmt::Display) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(error.to_string())))
}

fn not_found(error: impl std::fmt::Display) -> ApiError {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new(error.to_string())))
}

fn persist_if_auto_save(state: &AppState) {
    let store = state.client.store();
    if store.auto_save() {
        if let Err(e) = ConfigManager::save(&store.snapshot()) {
            warn!("Failed to save configuration: {e:#}");
        }
    }
}

pub async fn list_routes(State(state): State<Arc<AppState>>) -> Json<Vec<RoutingRule>> {
    Json(state.client.store().routes())
}

pub async fn add_route(
    State(state): State<Arc<AppState>>,
    Json(rule): Json<RoutingRule>,
) -> Result<(StatusCode, Json<RoutingRule>), ApiError> {
    debug!("Adding route {rule}");
    state.client.store().add_route(rule.clone()).map_err(bad_request)?;
    persist_if_auto_save(&state);
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn update_route(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
    Json(rule): Json<RoutingRule>,
) -> Result<Json<RoutingRule>, ApiError> {
    if index >= state.client.store().routes().len() {
        return Err(not_found("Route not found"));
    }
    state.client.store().update_route(index, rule.clone()).map_err(bad_request)?;
    persist_if_auto_save(&state);
    Ok(Json(rule))
}

pub async fn delete_route(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Result<Json<RoutingRule>, ApiError> {
    let removed = state.client.store().remove_route(index).map_err(not_found)?;
    persist_if_auto_save(&state);
    Ok(Json(removed))
}

pub async fn start_client(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.client.connect().map_err(|e| {
        (StatusCode::CONFLICT, Json(ErrorResponse::new(e.to_string())))
    })?;
    Ok(Json(MessageResponse {
        message: "Client started".to_string(),
    }))
}

pub async fn stop_client(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.client.disconnect().map_err(|e| {
        (StatusCode::CONFLICT, Json(ErrorResponse::new(e.to_string())))
    })?;
    Ok(Json(MessageResponse {
        message: "Client stopped".to_string(),
    }))
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let client = &state.client;
    Json(StatusResponse {
        running: client.is_running(),
        state: client.state(),
        full_domain: client.store().full_domain(),
        mode: client.store().mode(),
        total_connections: client.stats().total_connections(),
        active_connections: client.stats().active_connections(),
        tracked_tasks: client.tracker().len(),
    })
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let stats = state.client.stats();
    Json(StatsResponse {
        total_connections: stats.total_connections(),
        active_connections: stats.active_connections(),
        routes: stats.route_snapshots(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<AgentConfig> {
    Json(state.client.store().snapshot())
}

pub async fn update_domain(
    State(state): State<Arc<AppState>>,
    Json(update): Json<DomainUpdate>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.client.store().set_domain(update.domain).map_err(bad_request)?;
    persist_if_auto_save(&state);
    Ok(Json(MessageResponse {
        message: "Domain updated".to_string(),
    }))
}

pub async fn update_signal(
    State(state): State<Arc<AppState>>,
    Json(update): Json<SignalUpdate>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .client
        .store()
        .set_signal(update.signal_host, update.signal_port, update.data_port)
        .map_err(bad_request)?;
    persist_if_auto_save(&state);
    Ok(Json(MessageResponse {
        message: "Signal server updated".to_string(),
    }))
}

pub async fn update_mode(
    State(state): State<Arc<AppState>>,
    Json(update): Json<ModeUpdate>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.client.store().set_mode(update.mode);
    persist_if_auto_save(&state);
    Ok(Json(MessageResponse {
        message: "Mode updated".to_string(),
    }))
}
