//! Control-channel client
//!
//! Owns the persistent signal-server connection. One long-lived task dials,
//! registers the agent's hostname, then processes newline-delimited commands
//! (`PING`, `CONNECT <id>`), spawning an independent task per tunnel. Lost
//! connections are retried with exponential backoff while `auto_reconnect`
//! is set; `disconnect()` tears everything down through the resource
//! tracker.

use crate::config::ConfigStore;
use crate::events::{AgentEvent, EventBus};
use crate::reconnect::Backoff;
use crate::stats::ConnectionStats;
use crate::tracker::ResourceTracker;
use crate::AgentError;
use serde::Serialize;
use socket2::SockRef;
use std::sync::{Arc, Mutex, RwLock};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use tunneller_router::RouteTable;

/// Control-channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientState {
    Idle,
    Dialing,
    Registered,
    Retrying,
}

/// The tunnel agent's control-channel client
pub struct TunnelClient {
    store: Arc<ConfigStore>,
    tracker: Arc<ResourceTracker>,
    stats: Arc<ConnectionStats>,
    events: EventBus,
    /// Published route table; requests clone the Arc for a stable snapshot
    table: RwLock<Arc<RouteTable>>,
    state: Mutex<ClientState>,
    running: watch::Sender<bool>,
    main_task: Mutex<Option<JoinHandle<()>>>,
}

impl TunnelClient {
    /// Create a client bound to `store`. Installs itself as the store's
    /// routes-changed listener so rule edits republish the sorted table
    /// before the next `CONNECT` is dispatched.
    pub fn new(store: Arc<ConfigStore>) -> Arc<Self> {
        let (running, _) = watch::channel(false);
        let client = Arc::new(Self {
            table: RwLock::new(Arc::new(store.route_table())),
            store,
            tracker: Arc::new(ResourceTracker::new()),
            stats: Arc::new(ConnectionStats::new()),
            events: EventBus::new(),
            state: Mutex::new(ClientState::Idle),
            running,
            main_task: Mutex::new(None),
        });

        let weak = Arc::downgrade(&client);
        client.store.set_routes_listener(move || {
            if let Some(client) = weak.upgrade() {
                client.rebuild_routes();
            }
        });

        client
    }

    /// Rebuild and publish the sorted route table from the current config
    pub fn rebuild_routes(&self) {
        let table = Arc::new(self.store.route_table());
        *self.table.write().unwrap_or_else(|e| e.into_inner()) = table;
        self.events.emit(AgentEvent::RoutesChanged);
    }

    /// Atomic snapshot of the published table; edits after this call do not
    /// affect the returned table
    pub fn route_snapshot(&self) -> Arc<RouteTable> {
        self.table.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn state(&self) -> ClientState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    pub fn tracker(&self) -> &Arc<ResourceTracker> {
        &self.tracker
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) fn set_state(&self, state: ClientState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Start the control loop. Errors if already running.
    pub fn connect(self: &Arc<Self>) -> Result<(), AgentError> {
        let mut main_task = self.main_task.lock().unwrap_or_else(|e| e.into_inner());
        if *self.running.borrow() {
            return Err(AgentError::AlreadyRunning);
        }
        self.running.send_replace(true);
        self.set_state(ClientState::Dialing);

        let client = Arc::clone(self);
        *main_task = Some(tokio::spawn(async move {
            client.run_loop().await;
        }));

        info!("Client started");
        Ok(())
    }

    /// Stop the control loop and close every tracked resource. Completes
    /// without waiting on in-flight backend I/O.
    pub fn disconnect(&self) -> Result<(), AgentError> {
        let mut main_task = self.main_task.lock().unwrap_or_else(|e| e.into_inner());
        if !*self.running.borrow() {
            return Err(AgentError::NotRunning);
        }

        info!("Shutting down client...");
        self.running.send_replace(false);

        if let Some(handle) = main_task.take() {
            handle.abort();
        }
        self.tracker.close_all();

        self.set_state(ClientState::Idle);
        self.events.emit(AgentEvent::Disconnected);
        info!("Client shutdown complete");
        Ok(())
    }

    async fn run_loop(self: Arc<Self>) {
        let mut running = self.running.subscribe();
        let mut backoff = Backoff::new();

        while *self.running.borrow() {
            self.set_state(ClientState::Dialing);

            match self.run_session(&mut running).await {
                Ok(()) => {
                    // Clean session: the relay closed or shutdown was
                    // requested; the backoff schedule starts over
                    backoff.reset();
                }
                Err(e) => {
                    error!("Signal connection failed: {e}");
                }
            }

            if !*self.running.borrow() {
                break;
            }
            if !self.store.auto_reconnect() {
                warn!("Auto-reconnect disabled. Stopping.");
                break;
            }

            self.set_state(ClientState::Retrying);
            let delay = backoff.next_delay();
            warn!(
                "Retrying in {} seconds... (attempt {})",
                delay.as_secs(),
                backoff.attempt()
            );
            tokio::select! {
                _ = sleep(delay) => {}
                _ = running.wait_for(|up| !*up) => break,
            }
        }

        self.running.send_replace(false);
        self.set_state(ClientState::Idle);
        info!("Client stopped");
    }

    /// One signal-server session: dial, register, process commands until
    /// EOF, error, or shutdown. `Ok(())` means the session ended cleanly.
    async fn run_session(
        self: &Arc<Self>,
        running: &mut watch::Receiver<bool>,
    ) -> Result<(), AgentError> {
        let (signal_host, signal_port) = self.store.signal_addr();
        info!("Connecting to signal server {signal_host}:{signal_port}...");

        let stream = TcpStream::connect((signal_host.as_str(), signal_port)).await?;
        // Keep-alive surfaces half-open connections as read errors, which
        // triggers the reconnect path
        SockRef::from(&stream).set_keepalive(true)?;

        let full_domain = self.store.full_domain();
        let (read_half, mut write_half) = stream.into_split();

        write_half
            .write_all(format!("REGISTER {full_domain}\n").as_bytes())
            .await?;
        write_half.flush().await?;
        info!("Registered as {full_domain}");

        self.set_state(ClientState::Registered);
        self.events.emit(AgentEvent::Connected);

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        let result = loop {
            line.clear();
            let read = tokio::select! {
                read = reader.read_line(&mut line) => read,
                _ = running.wait_for(|up| !*up) => break Ok(()),
            };

            let n = match read {
                Ok(n) => n,
                Err(e) => break Err(AgentError::Io(e)),
            };
            if n == 0 {
                info!("Signal server closed connection");
                break Ok(());
            }

            let command = line.trim_end_matches(['\r', '\n']);
            if command.is_empty() {
                continue;
            }

            if command == "PING" {
                if let Err(e) = write_half.write_all(b"PONG\n").await {
                    break Err(AgentError::Io(e));
                }
                if let Err(e) = write_half.flush().await {
                    break Err(AgentError::Io(e));
                }
                debug!("Heartbeat: PING <-> PONG");
                self.events.emit(AgentEvent::Heartbeat);
            } else if let Some(rest) = command.strip_prefix("CONNECT ") {
                let request_id = rest.split(' ').next().unwrap_or_default();
                if request_id.is_empty() {
                    error!("Invalid CONNECT command: {command}");
                    continue;
                }
                info!("Received CONNECT request: {request_id}");
                self.spawn_request(request_id.to_string());
            } else {
                warn!("Unknown command: {command}");
            }
        };

        self.events.emit(AgentEvent::Disconnected);
        result
    }

    /// Spawn a tracked per-request task; it runs concurrently with further
    /// command reads
    fn spawn_request(self: &Arc<Self>, request_id: String) {
        let client = Arc::clone(self);
        self.tracker.spawn_tracked(async move {
            client.handle_tunnel(request_id).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use tunneller_router::RoutingRule;

    fn client() -> Arc<TunnelClient> {
        // Point at a local closed port so nothing leaves the machine if a
        // test starts the control loop
        let mut config = AgentConfig::default();
        config.signal_host = "127.0.0.1".to_string();
        config.signal_port = 1;
        TunnelClient::new(Arc::new(ConfigStore::new(config)))
    }

    #[tokio::test]
    async fn test_initial_state_is_idle() {
        let client = client();
        assert_eq!(client.state(), ClientState::Idle);
        assert!(!client.is_running());
    }

    #[tokio::test]
    async fn test_rule_edit_republishes_table() {
        let client = client();
        let before = client.route_snapshot();

        client
            .store()
            .add_route(
                RoutingRule::builder("/api/*", "localhost", 8081)
                    .priority(1)
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let after = client.route_snapshot();
        assert_eq!(after.len(), before.len() + 1);
        // The first match for /api/x moved to the new rule
        assert_eq!(after.lookup("/api/x").unwrap().target_port, 8081);
    }

    #[tokio::test]
    async fn test_snapshot_is_stable_across_edits() {
        let client = client();
        let snapshot = client.route_snapshot();
        let len_before = snapshot.len();

        client
            .store()
            .add_route(RoutingRule::builder("/new/*", "localhost", 9001).build().unwrap())
            .unwrap();

        // The held snapshot does not see the edit: /new/x still falls
        // through to the default /* rule
        assert_eq!(snapshot.len(), len_before);
        assert_eq!(snapshot.lookup("/new/x").unwrap().target_port, 8080);
        assert_eq!(client.route_snapshot().lookup("/new/x").unwrap().target_port, 9001);
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_errors() {
        let client = client();
        assert!(matches!(client.disconnect(), Err(AgentError::NotRunning)));
    }

    #[tokio::test]
    async fn test_connect_twice_errors() {
        let client = client();
        client.connect().unwrap();
        assert!(matches!(client.connect(), Err(AgentError::AlreadyRunning)));
        client.disconnect().unwrap();
        assert_eq!(client.state(), ClientState::Idle);
        assert!(client.tracker().is_empty());
    }
}
