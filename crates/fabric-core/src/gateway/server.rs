//! The control-plane WebSocket server (§4.15/§4.17): accepts
//! connections, runs each through the handshake, dispatches `req`
//! frames against the [`MethodRegistry`], and fans out bus events via
//! the [`EventBridge`].

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{info, warn};

use crate::clock::new_id;
use crate::gateway::connection::{Connection, PresenceTracker};
use crate::gateway::event_bridge::{EventBridge, FrameSink};
use crate::gateway::frames::{
    Auth, EventFrame, Features, HelloOk, Policy, ReqFrame, ResFrame, ServerInfo, Snapshot, DEFAULT_MAX_BUFFERED_BYTES,
    DEFAULT_MAX_PAYLOAD, DEFAULT_TICK_INTERVAL_MS, PROTOCOL_VERSION,
};
use crate::gateway::registry::{MethodContext, MethodRegistry, Scope};

/// Everything the accept loop needs, bundled the same way
/// [`crate::gateway::state::GatewayState`] bundles the method
/// collaborators.
pub struct GatewayServer {
    pub registry: Arc<MethodRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub event_bridge: Arc<EventBridge>,
    pub host: String,
    pub port: u16,
}

impl GatewayServer {
    pub fn new(registry: Arc<MethodRegistry>, presence: Arc<PresenceTracker>, event_bridge: Arc<EventBridge>, host: String, port: u16) -> Self {
        Self {
            registry,
            presence,
            event_bridge,
            host,
            port,
        }
    }

    pub async fn serve(self: Arc<Self>) -> std::io::Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.host, self.port).parse().map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("bad listen address: {e}"))
        })?;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "gateway server listening");

        loop {
            let (stream, peer) = listener.accept().await?;
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.accept(stream, peer).await {
                    warn!(%peer, "gateway connection ended with error: {e}");
                }
            });
        }
    }

    async fn accept(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) -> anyhow::Result<()> {
        let ws = tokio_tungstenite::accept_async(stream).await?;
        let (mut write, mut read) = ws.split();

        let conn_id = new_id("conn");
        let mut conn = Connection::new(conn_id.clone());

        let (tx, mut rx) = mpsc::channel::<WsMessage>(256);
        let sink: Arc<dyn FrameSink> = Arc::new(WsFrameSink { tx: tx.clone() });
        self.event_bridge.add_sink(sink).await;

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        while let Some(frame) = read.next().await {
            let frame = match frame {
                Ok(f) => f,
                Err(_) => break,
            };
            let text = match frame {
                WsMessage::Text(t) => t.to_string(),
                WsMessage::Close(_) => break,
                _ => continue,
            };

            let req: ReqFrame = match serde_json::from_str(&text) {
                Ok(r) => r,
                Err(e) => {
                    warn!(%peer, "gateway: malformed request frame: {e}");
                    continue;
                }
            };

            if req.method == "connect" {
                let res = self.handle_connect(&mut conn, &req, peer).await;
                let _ = tx.send(WsMessage::text(serde_json::to_string(&res)?)).await;
                continue;
            }

            if let Err(e) = conn.require_ready() {
                let res = ResFrame::err(req.id, &e);
                let _ = tx.send(WsMessage::text(serde_json::to_string(&res)?)).await;
                continue;
            }

            let ctx = MethodContext {
                conn_id: conn.conn_id.clone(),
                scopes: conn.scopes.clone(),
                client_id: conn.client_id.clone(),
            };
            let result = self.registry.dispatch(&req.method, req.params.clone(), &ctx).await;
            let res = match result {
                Ok(payload) => ResFrame::ok(req.id, payload),
                Err(e) => ResFrame::err(req.id, &e),
            };
            let _ = tx.send(WsMessage::text(serde_json::to_string(&res)?)).await;
        }

        conn.close();
        self.presence.mark_disconnected(&conn.conn_id).await;
        drop(tx);
        let _ = writer.await;
        Ok(())
    }

    /// The `connect` method is handled outside [`MethodRegistry`]
    /// dispatch because it mutates the per-connection [`Connection`]
    /// state machine the registry has no slot for; the response it
    /// produces is the one-time `hello_ok` frame, not a normal `res`.
    async fn handle_connect(&self, conn: &mut Connection, req: &ReqFrame, peer: SocketAddr) -> serde_json::Value {
        let role = req
            .params
            .get("role")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("operator")
            .to_string();
        let client_id = req
            .params
            .get("client_id")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        let scopes = role_scopes(&role);

        if let Err(e) = conn.handshake(role.clone(), scopes.clone(), client_id.clone()) {
            return json!(ResFrame::err(req.id.clone(), &e));
        }

        self.presence.mark_connected(&conn.conn_id, &role, client_id.clone(), None).await;

        let hello = HelloOk {
            protocol: PROTOCOL_VERSION,
            server: ServerInfo {
                version: env!("CARGO_PKG_VERSION").to_string(),
                conn_id: conn.conn_id.clone(),
                host: peer.to_string(),
            },
            features: Features {
                methods: self.registry.names(),
                events: vec!["agent".into(), "chat".into(), "cron".into(), "cron.job".into(), "tick".into(), "presence".into()],
            },
            snapshot: Snapshot {
                presence: json!(self.presence.snapshot().await),
                health: json!({"status": "ok"}),
            },
            policy: Policy {
                max_payload: DEFAULT_MAX_PAYLOAD,
                max_buffered_bytes: DEFAULT_MAX_BUFFERED_BYTES,
                tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            },
            auth: Auth {
                role,
                scopes: scopes.into_iter().map(|s| format!("{s:?}").to_lowercase()).collect(),
            },
        };

        json!({"id": req.id, "ok": true, "hello_ok": hello})
    }
}

/// Default scope grants per handshake role. A real deployment would load
/// this from a pairing/auth layer (component Q's `pairing` scope exists
/// for exactly that); absent one, `operator` gets everything but
/// `approvals`/`admin`, matching how the teacher's config treats a local
/// trusted operator.
fn role_scopes(role: &str) -> HashSet<Scope> {
    match role {
        "admin" => HashSet::from([
            Scope::Read,
            Scope::Write,
            Scope::Admin,
            Scope::Approvals,
            Scope::Invoke,
            Scope::Event,
            Scope::Control,
        ]),
        "approver" => HashSet::from([Scope::Read, Scope::Approvals, Scope::Event]),
        _ => HashSet::from([Scope::Read, Scope::Write, Scope::Invoke, Scope::Event]),
    }
}

struct WsFrameSink {
    tx: mpsc::Sender<WsMessage>,
}

#[async_trait::async_trait]
impl FrameSink for WsFrameSink {
    async fn send(&self, frame: &EventFrame) {
        if let Ok(text) = serde_json::to_string(frame) {
            let _ = self.tx.send(WsMessage::text(text)).await;
        }
    }
}
