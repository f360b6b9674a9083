//! Agent lifecycle events
//!
//! A broadcast stream consumed by UIs and the admin API. Slow subscribers
//! lag and drop; the agent never blocks on them.

use tokio::sync::broadcast;

/// Events emitted by the tunnel client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// Control channel registered with the relay
    Connected,
    /// Control channel lost or shut down
    Disconnected,
    /// PING answered with PONG
    Heartbeat,
    /// Route table republished after a rule edit
    RoutesChanged,
}

/// Broadcast fan-out for [`AgentEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; a send with no subscribers is not an error
    pub fn emit(&self, event: AgentEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(AgentEvent::Connected);
        bus.emit(AgentEvent::Heartbeat);

        assert_eq!(rx.recv().await.unwrap(), AgentEvent::Connected);
        assert_eq!(rx.recv().await.unwrap(), AgentEvent::Heartbeat);
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(AgentEvent::Disconnected);
    }
}
