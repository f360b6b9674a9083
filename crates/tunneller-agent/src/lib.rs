//! Tunnel agent runtime
//!
//! The agent registers a public hostname with a remote relay over a
//! persistent control channel, receives per-request connect notifications,
//! and opens matching data channels back to the relay. Each data channel is
//! either spliced raw to a single local target or routed to one of several
//! local backends by the first line of the HTTP request.

pub mod client;
pub mod config;
pub mod events;
pub mod http_parser;
pub mod persist;
pub mod pipe;
pub mod reconnect;
pub mod route_handler;
pub mod stats;
pub mod tls;
pub mod tracker;
pub mod tunnel;

pub use client::{ClientState, TunnelClient};
pub use config::{AgentConfig, ConfigStore, OperationalMode};
pub use events::{AgentEvent, EventBus};
pub use http_parser::ParsedHead;
pub use persist::ConfigManager;
pub use stats::{ConnectionStats, RouteStatsSnapshot};
pub use tracker::ResourceTracker;

use thiserror::Error;

/// Agent runtime errors
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Client already running")]
    AlreadyRunning,

    #[error("Client not running")]
    NotRunning,
}
