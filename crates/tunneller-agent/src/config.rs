//! Agent configuration store
//!
//! [`AgentConfig`] is the plain data that round-trips through the persisted
//! JSON document. [`ConfigStore`] wraps it for concurrent access and fires a
//! routes-changed listener synchronously on every rule mutation, so the
//! control-channel client republishes its sorted table before the next
//! `CONNECT` is dispatched.

use crate::AgentError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Mutex, RwLock};
use tunneller_router::{RouteTable, RoutingRule};

/// Default relay domain suffix appended to bare agent names
pub const DEFAULT_DOMAIN_SUFFIX: &str = "inthespace.online";

fn default_domain_suffix() -> String {
    DEFAULT_DOMAIN_SUFFIX.to_string()
}

fn default_signal_port() -> u16 {
    6060
}

fn default_data_port() -> u16 {
    7070
}

fn default_raw_target_port() -> u16 {
    80
}

fn default_buffer_size() -> usize {
    8192
}

fn default_admin_port() -> u16 {
    8090
}

/// Forwarding mode for incoming data channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationalMode {
    /// Splice every data channel to the single raw target
    RawMode,
    /// Parse the HTTP head and dispatch through the route table
    RoutingMode,
}

/// Persisted agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Agent hostname; combined with `domain_suffix` for REGISTER lines
    pub domain: String,
    /// Relay public suffix
    pub domain_suffix: String,
    pub mode: OperationalMode,
    pub raw_target_host: String,
    pub raw_target_port: u16,
    pub signal_host: String,
    pub signal_port: u16,
    pub data_port: u16,
    pub routes: Vec<RoutingRule>,
    pub auto_save: bool,
    pub auto_load: bool,
    pub auto_reconnect: bool,
    pub force_connection_close: bool,
    pub monitoring_enabled: bool,
    pub buffer_size: usize,
    pub admin_port: u16,
    pub path_pattern_history: BTreeSet<String>,
    pub target_host_history: BTreeSet<String>,
    pub target_port_history: BTreeSet<u16>,
    pub domain_history: BTreeSet<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            domain: "lawfirm".to_string(),
            domain_suffix: default_domain_suffix(),
            mode: OperationalMode::RoutingMode,
            raw_target_host: "127.0.0.1".to_string(),
            raw_target_port: default_raw_target_port(),
            signal_host: DEFAULT_DOMAIN_SUFFIX.to_string(),
            signal_port: default_signal_port(),
            data_port: default_data_port(),
            routes: vec![default_fallback_route()],
            auto_save: true,
            auto_load: true,
            auto_reconnect: true,
            force_connection_close: false,
            monitoring_enabled: true,
            buffer_size: default_buffer_size(),
            admin_port: default_admin_port(),
            path_pattern_history: BTreeSet::new(),
            target_host_history: BTreeSet::new(),
            target_port_history: BTreeSet::new(),
            domain_history: BTreeSet::new(),
        }
    }
}

fn default_fallback_route() -> RoutingRule {
    RoutingRule::builder("/*", "localhost", 8080)
        .description("Default Fallback")
        .build()
        .unwrap_or_else(|_| unreachable!("default route is valid"))
}

impl AgentConfig {
    /// Full hostname sent to the relay: `domain` with the suffix appended
    /// when not already present
    pub fn full_domain(&self) -> String {
        let suffix = format!(".{}", self.domain_suffix);
        if self.domain.ends_with(&suffix) {
            self.domain.clone()
        } else {
            format!("{}{}", self.domain, suffix)
        }
    }
}

type RoutesListener = Box<dyn Fn() + Send + Sync>;

/// Thread-safe configuration with routes-changed notification
pub struct ConfigStore {
    inner: RwLock<AgentConfig>,
    // Single listener slot; invoked synchronously on rule mutations
    listener: Mutex<Option<RoutesListener>>,
}

impl ConfigStore {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            inner: RwLock::new(config),
            listener: Mutex::new(None),
        }
    }

    /// Install the routes-changed listener, replacing any previous one
    pub fn set_routes_listener(&self, listener: impl Fn() + Send + Sync + 'static) {
        *self.listener.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(listener));
    }

    fn notify_routes_changed(&self) {
        let guard = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(listener) = guard.as_ref() {
            listener();
        }
    }

    /// Clone of the full current configuration
    pub fn snapshot(&self) -> AgentConfig {
        self.read().clone()
    }

    /// Replace the whole configuration (used by config import/load)
    pub fn replace(&self, config: AgentConfig) {
        *self.write() = config;
        self.notify_routes_changed();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, AgentConfig> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, AgentConfig> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    // === Reads ===

    pub fn full_domain(&self) -> String {
        self.read().full_domain()
    }

    pub fn mode(&self) -> OperationalMode {
        self.read().mode
    }

    pub fn signal_addr(&self) -> (String, u16) {
        let cfg = self.read();
        (cfg.signal_host.clone(), cfg.signal_port)
    }

    pub fn data_port(&self) -> u16 {
        self.read().data_port
    }

    pub fn raw_target(&self) -> (String, u16) {
        let cfg = self.read();
        (cfg.raw_target_host.clone(), cfg.raw_target_port)
    }

    pub fn auto_reconnect(&self) -> bool {
        self.read().auto_reconnect
    }

    pub fn auto_save(&self) -> bool {
        self.read().auto_save
    }

    pub fn force_connection_close(&self) -> bool {
        self.read().force_connection_close
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.read().monitoring_enabled
    }

    pub fn buffer_size(&self) -> usize {
        self.read().buffer_size
    }

    pub fn admin_port(&self) -> u16 {
        self.read().admin_port
    }

    pub fn routes(&self) -> Vec<RoutingRule> {
        self.read().routes.clone()
    }

    /// Build a freshly sorted table from the current rule list
    pub fn route_table(&self) -> RouteTable {
        RouteTable::new(self.routes())
    }

    // === Mutations ===

    /// Append a rule. The rule is validated; histories are updated and the
    /// routes-changed listener fires before this returns.
    pub fn add_route(&self, rule: RoutingRule) -> Result<(), AgentError> {
        rule.validate()
            .map_err(|e| AgentError::Config(e.to_string()))?;
        {
            let mut cfg = self.write();
            cfg.path_pattern_history.insert(rule.path_pattern.clone());
            cfg.target_host_history.insert(rule.target_host.clone());
            cfg.target_port_history.insert(rule.target_port);
            cfg.routes.push(rule);
        }
        self.notify_routes_changed();
        Ok(())
    }

    /// Remove the rule at `index` (insertion order, not sorted order)
    pub fn remove_route(&self, index: usize) -> Result<RoutingRule, AgentError> {
        let removed = {
            let mut cfg = self.write();
            if index >= cfg.routes.len() {
                return Err(AgentError::Config(format!("no route at index {index}")));
            }
            cfg.routes.remove(index)
        };
        self.notify_routes_changed();
        Ok(removed)
    }

    /// Replace the rule at `index`
    pub fn update_route(&self, index: usize, rule: RoutingRule) -> Result<(), AgentError> {
        rule.validate()
            .map_err(|e| AgentError::Config(e.to_string()))?;
        {
            let mut cfg = self.write();
            if index >= cfg.routes.len() {
                return Err(AgentError::Config(format!("no route at index {index}")));
            }
            cfg.path_pattern_history.insert(rule.path_pattern.clone());
            cfg.target_host_history.insert(rule.target_host.clone());
            cfg.target_port_history.insert(rule.target_port);
            cfg.routes[index] = rule;
        }
        self.notify_routes_changed();
        Ok(())
    }

    pub fn set_domain(&self, domain: String) -> Result<(), AgentError> {
        if domain.is_empty() {
            return Err(AgentError::Config("domain must not be empty".into()));
        }
        let mut cfg = self.write();
        cfg.domain_history.insert(domain.clone());
        cfg.domain = domain;
        Ok(())
    }

    pub fn set_signal(&self, host: String, signal_port: u16, data_port: u16) -> Result<(), AgentError> {
        if host.is_empty() {
            return Err(AgentError::Config("signal host must not be empty".into()));
        }
        if signal_port == 0 || data_port == 0 {
            return Err(AgentError::Config("ports must be in 1..=65535".into()));
        }
        let mut cfg = self.write();
        cfg.signal_host = host;
        cfg.signal_port = signal_port;
        cfg.data_port = data_port;
        Ok(())
    }

    pub fn set_mode(&self, mode: OperationalMode) {
        self.write().mode = mode;
    }

    pub fn set_raw_target(&self, host: String, port: u16) -> Result<(), AgentError> {
        if host.is_empty() || port == 0 {
            return Err(AgentError::Config("invalid raw target".into()));
        }
        let mut cfg = self.write();
        cfg.raw_target_host = host;
        cfg.raw_target_port = port;
        Ok(())
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.write().auto_reconnect = enabled;
    }

    pub fn set_force_connection_close(&self, enabled: bool) {
        self.write().force_connection_close = enabled;
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(AgentConfig::default())
    }
}
