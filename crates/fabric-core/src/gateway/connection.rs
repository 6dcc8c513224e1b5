//! Connection / Presence (component Q, §4.17): the per-WebSocket
//! handshake state machine and the process-wide presence table it
//! updates on connect/disconnect.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;

use crate::bus::{Bus, Event};
use crate::clock::now_ms;
use crate::error::{FabricError, Result};
use crate::gateway::registry::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Opened,
    HandshakeRequired,
    Ready,
    Closed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PresenceEntry {
    pub role: String,
    pub client_id: Option<String>,
    pub pid: Option<u32>,
    pub connected_at_ms: i64,
}

/// One WebSocket connection's handshake state. `conn_id` is stable for the
/// connection's lifetime; everything else is populated by the first valid
/// `connect` call.
pub struct Connection {
    pub conn_id: String,
    state: ConnState,
    pub role: Option<String>,
    pub scopes: HashSet<Scope>,
    pub client_id: Option<String>,
}

impl Connection {
    pub fn new(conn_id: impl Into<String>) -> Self {
        Self {
            conn_id: conn_id.into(),
            state: ConnState::HandshakeRequired,
            role: None,
            scopes: HashSet::new(),
            client_id: None,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// §4.17's handshake transition: `connect` with valid params promotes
    /// `handshake_required → ready`. A second `connect` is rejected with
    /// `already_connected` without touching existing state. Any other
    /// method before handshake returns `handshake_required`.
    pub fn handshake(
        &mut self,
        role: impl Into<String>,
        scopes: HashSet<Scope>,
        client_id: Option<String>,
    ) -> Result<()> {
        match self.state {
            ConnState::HandshakeRequired => {
                self.role = Some(role.into());
                self.scopes = scopes;
                self.client_id = client_id;
                self.state = ConnState::Ready;
                Ok(())
            }
            ConnState::Ready => Err(FabricError::AlreadyConnected),
            ConnState::Opened | ConnState::Closed => Err(FabricError::HandshakeRequired),
        }
    }

    /// Guard every non-`connect` request: returns an error unless the
    /// connection has completed its handshake.
    pub fn require_ready(&self) -> Result<()> {
        if self.state == ConnState::Ready {
            Ok(())
        } else {
            Err(FabricError::HandshakeRequired)
        }
    }

    pub fn close(&mut self) {
        self.state = ConnState::Closed;
    }
}

/// Process-wide presence table: `conn_id → {role, client_id, pid,
/// connected_at}`. Every mutation broadcasts `presence_changed` on the
/// `"presence"` bus topic so the EventBridge can fan it out.
pub struct PresenceTracker {
    bus: Arc<Bus>,
    entries: RwLock<HashMap<String, PresenceEntry>>,
}

impl PresenceTracker {
    pub fn new(bus: Arc<Bus>) -> Self {
        Self {
            bus,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn mark_connected(&self, conn_id: &str, role: &str, client_id: Option<String>, pid: Option<u32>) {
        let entry = PresenceEntry {
            role: role.to_string(),
            client_id,
            pid,
            connected_at_ms: now_ms(),
        };
        self.entries.write().await.insert(conn_id.to_string(), entry.clone());
        self.broadcast_changed(conn_id, Some(&entry)).await;
    }

    pub async fn mark_disconnected(&self, conn_id: &str) {
        self.entries.write().await.remove(conn_id);
        self.broadcast_changed(conn_id, None).await;
    }

    pub async fn snapshot(&self) -> HashMap<String, PresenceEntry> {
        self.entries.read().await.clone()
    }

    async fn broadcast_changed(&self, conn_id: &str, entry: Option<&PresenceEntry>) {
        let payload = json!({
            "conn_id": conn_id,
            "entry": entry,
        });
        self.bus
            .broadcast("presence", Event::new("presence_changed", payload))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_promotes_handshake_required_to_ready() {
        let mut conn = Connection::new("c1");
        assert_eq!(conn.state(), ConnState::HandshakeRequired);
        conn.handshake("operator", HashSet::from([Scope::Read]), Some("cli".into()))
            .unwrap();
        assert_eq!(conn.state(), ConnState::Ready);
        assert!(conn.require_ready().is_ok());
    }

    #[test]
    fn second_connect_is_already_connected() {
        let mut conn = Connection::new("c1");
        conn.handshake("operator", HashSet::new(), None).unwrap();
        let err = conn.handshake("operator", HashSet::new(), None).unwrap_err();
        assert_eq!(err.code(), "already_connected");
    }

    #[test]
    fn requests_before_handshake_require_ready_fails() {
        let conn = Connection::new("c1");
        let err = conn.require_ready().unwrap_err();
        assert_eq!(err.code(), "handshake_required");
    }

    #[tokio::test]
    async fn presence_tracker_broadcasts_on_connect_and_disconnect() {
        let bus = Arc::new(Bus::new());
        let (_id, mut rx) = bus.subscribe("presence").await;
        let tracker = PresenceTracker::new(bus);

        tracker.mark_connected("c1", "operator", None, None).await;
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.event_type, "presence_changed");
        assert_eq!(tracker.snapshot().await.len(), 1);

        tracker.mark_disconnected("c1").await;
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.event_type, "presence_changed");
        assert_eq!(tracker.snapshot().await.len(), 0);
    }
}
