//! Request and response bodies for the admin API

use serde::{Deserialize, Serialize};
use tunneller_agent::{ClientState, OperationalMode, RouteStatsSnapshot};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub running: bool,
    pub state: ClientState,
    pub full_domain: String,
    pub mode: OperationalMode,
    pub total_connections: u64,
    pub active_connections: u64,
    pub tracked_tasks: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub total_connections: u64,
    pub active_connections: u64,
    pub routes: Vec<RouteStatsSnapshot>,
}

#[derive(Debug, Deserialize)]
pub struct DomainUpdate {
    pub domain: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalUpdate {
    pub signal_host: String,
    pub signal_port: u16,
    pub data_port: u16,
}

#[derive(Debug, Deserialize)]
pub struct ModeUpdate {
    pub mode: OperationalMode,
}
