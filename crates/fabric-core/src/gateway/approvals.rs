//! Approvals Bridge (component M, §4.13): turns `exec_approvals` bus
//! events into an interactive prompt on the originating transport, and
//! routes the human's decision back.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::bus::{Bus, Event};
use crate::gateway::transport::Transport;
use crate::model::OutboundPayload;
use crate::session_key::SessionKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    ApproveOnce,
    ApproveSession,
    ApproveAgent,
    ApproveGlobal,
    Deny,
}

/// Where a pending approval's prompt was sent, so a later
/// `approval_resolved` event knows what to edit/clear.
#[derive(Debug, Clone)]
struct Correlation {
    peer_id: String,
    thread_id: Option<String>,
    message_id: String,
}

/// Anything that can act on a resolved approval decision — normally the
/// router, forwarding the decision to whatever paused the exec call.
#[async_trait::async_trait]
pub trait ApprovalSink: Send + Sync {
    async fn resolve(&self, approval_id: &str, decision: ApprovalDecision);
}

pub struct ApprovalsBridge {
    bus: Arc<Bus>,
    transport: Arc<dyn Transport>,
    channel_id: String,
    account_id: String,
    correlations: Mutex<HashMap<String, Correlation>>,
}

impl ApprovalsBridge {
    pub fn new(
        bus: Arc<Bus>,
        transport: Arc<dyn Transport>,
        channel_id: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            transport,
            channel_id: channel_id.into(),
            account_id: account_id.into(),
            correlations: Mutex::new(HashMap::new()),
        }
    }

    /// Does this pending approval belong to this bridge's (channel,
    /// account)? Only bridges whose transport can actually reach the
    /// peer should prompt for it.
    fn owns_session(&self, session_key: &str) -> bool {
        match SessionKey::parse(session_key) {
            SessionKey::ChannelPeer(k) => k.channel_id == self.channel_id && k.account_id == self.account_id,
            _ => false,
        }
    }

    /// Run the subscribe loop forever (spawned as the bridge's own
    /// long-lived actor task per §5).
    pub async fn run(self: Arc<Self>) {
        let (_id, mut rx) = self.bus.subscribe("exec_approvals").await;
        while let Some(ev) = rx.recv().await {
            match ev.event_type.as_str() {
                "approval_requested" => self.on_requested(ev).await,
                "approval_resolved" => self.on_resolved(ev).await,
                _ => {}
            }
        }
    }

    async fn on_requested(&self, ev: Event) {
        let Some(pending) = ev.payload.get("pending") else {
            return;
        };
        let Some(session_key) = pending.get("session_key").and_then(|v| v.as_str()) else {
            return;
        };
        if !self.owns_session(session_key) {
            return;
        }
        let Some(approval_id) = pending.get("approval_id").and_then(|v| v.as_str()) else {
            return;
        };
        let Some(peer_id) = pending.get("peer_id").and_then(|v| v.as_str()) else {
            return;
        };
        let thread_id = pending
            .get("thread_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let summary = pending
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or("An action needs your approval.");

        let payload = OutboundPayload {
            channel_id: self.channel_id.clone(),
            peer_id: peer_id.to_string(),
            thread_id: thread_id.clone(),
            text: format!("{summary}\n\nReply approve / deny."),
            idempotency_key: Some(format!("approval_prompt_{approval_id}")),
        };

        match self.transport.deliver(payload).await {
            Ok(descriptor) => {
                self.correlations.lock().await.insert(
                    approval_id.to_string(),
                    Correlation {
                        peer_id: peer_id.to_string(),
                        thread_id,
                        message_id: descriptor.message_id,
                    },
                );
            }
            Err(e) => warn!(approval_id, error = %e, "approvals: failed to deliver prompt"),
        }
    }

    async fn on_resolved(&self, ev: Event) {
        let Some(approval_id) = ev.payload.get("approval_id").and_then(|v| v.as_str()) else {
            return;
        };
        let Some(correlation) = self.correlations.lock().await.remove(approval_id) else {
            return;
        };
        let decision = ev
            .payload
            .get("decision")
            .and_then(|v| v.as_str())
            .unwrap_or("deny");

        let payload = OutboundPayload {
            channel_id: self.channel_id.clone(),
            peer_id: correlation.peer_id,
            thread_id: correlation.thread_id,
            text: format!("Approval {approval_id}: {decision}"),
            idempotency_key: Some(format!("approval_result_{approval_id}_{}", correlation.message_id)),
        };
        if let Err(e) = self.transport.deliver(payload).await {
            warn!(approval_id, error = %e, "approvals: failed to deliver resolution");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeliveryDescriptor;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    struct RecordingTransport {
        sent: StdMutex<Vec<OutboundPayload>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn channel_id(&self) -> &str {
            "telegram"
        }
        fn normalize(&self, _raw: serde_json::Value) -> crate::error::Result<Option<crate::model::InboundMessage>> {
            Ok(None)
        }
        async fn deliver(&self, payload: OutboundPayload) -> crate::error::Result<DeliveryDescriptor> {
            self.sent.lock().unwrap().push(payload);
            Ok(DeliveryDescriptor {
                message_id: "msg_1".into(),
            })
        }
    }

    #[tokio::test]
    async fn requested_event_for_owned_session_sends_a_prompt() {
        let bus = Arc::new(Bus::new());
        let transport = Arc::new(RecordingTransport {
            sent: StdMutex::new(Vec::new()),
        });
        let bridge = ApprovalsBridge::new(bus.clone(), transport.clone(), "telegram", "acct1");

        let session_key = SessionKey::channel_peer(
            "agent-a",
            "telegram",
            "acct1",
            crate::session_key::PeerKind::Dm,
            "user1",
            None,
            None,
        )
        .synthesize();

        bridge
            .on_requested(Event::new(
                "approval_requested",
                json!({"pending": {
                    "approval_id": "ap1",
                    "session_key": session_key,
                    "peer_id": "user1",
                    "summary": "run rm -rf /tmp/x",
                }}),
            ))
            .await;

        assert_eq!(transport.sent.lock().unwrap().len(), 1);
        assert_eq!(bridge.correlations.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn requested_event_for_foreign_session_is_ignored() {
        let bus = Arc::new(Bus::new());
        let transport = Arc::new(RecordingTransport {
            sent: StdMutex::new(Vec::new()),
        });
        let bridge = ApprovalsBridge::new(bus, transport.clone(), "telegram", "acct1");

        let session_key = SessionKey::channel_peer(
            "agent-a",
            "discord",
            "acct2",
            crate::session_key::PeerKind::Dm,
            "user1",
            None,
            None,
        )
        .synthesize();

        bridge
            .on_requested(Event::new(
                "approval_requested",
                json!({"pending": {"approval_id": "ap1", "session_key": session_key, "peer_id": "user1"}}),
            ))
            .await;

        assert!(transport.sent.lock().unwrap().is_empty());
    }
}
