//! The `Transport` contract (§6): anything that can turn a channel's raw
//! wire format into a normalized [`InboundMessage`] and deliver an
//! [`OutboundPayload`] back out. Concrete adapters (`channels::telegram`,
//! `channels::discord`) live behind cargo features; this module also
//! carries the XMTP/voice stub mandated by §10.6, since those SDKs are
//! explicitly out of scope but the placeholder-handling behavior from
//! §4.11 item 6 still needs somewhere to live.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{DeliveryDescriptor, InboundMessage, OutboundPayload};

/// What Transport Ingest (§4.11 item 6) should do with a non-text inbound
/// event before it ever reaches the debounce buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundAction {
    /// Nothing to do — e.g. an empty-text system event.
    Ignore,
    /// Reply with a canned message and stop (the channel can't carry the
    /// kind of payload the agent would need to act on).
    PlaceholderReply,
    /// Hand off to the normal ingest pipeline.
    RuntimeSubmit,
}

pub const PLACEHOLDER_TEXT: &str =
    "I can only process text XMTP messages right now…";
pub const PLACEHOLDER_MAX_BYTES: usize = 220;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Stable identifier used as `InboundMessage::channel_id` / in
    /// session keys (e.g. `"telegram"`, `"discord"`, `"xmtp"`).
    fn channel_id(&self) -> &str;

    /// Turn a raw, channel-specific event into a normalized message.
    /// Returns `None` for events that carry nothing worth ingesting
    /// (e.g. a bot's own echoed message).
    fn normalize(&self, raw: serde_json::Value) -> Result<Option<InboundMessage>>;

    /// §4.11 item 6: how an inbound event should be handled before it
    /// reaches the debounce buffer. The default always submits — only
    /// transports without a reliable text representation (XMTP, voice)
    /// need to override this.
    fn inbound_action(&self, message: &InboundMessage) -> InboundAction {
        if message.has_text() {
            InboundAction::RuntimeSubmit
        } else {
            InboundAction::Ignore
        }
    }

    /// Deliver an outbound payload. Implementations must honor
    /// `idempotency_key` — replaying the same key must not double-send.
    async fn deliver(&self, payload: OutboundPayload) -> Result<DeliveryDescriptor>;
}

/// Placeholder adapter for transports whose SDKs are out of scope (XMTP,
/// voice). `normalize` never needs real implementing here, since there's
/// no wire format to parse; ingest code exercises this transport purely
/// through `inbound_action` on a message it already has in hand.
pub struct PlaceholderTransport {
    channel_id: String,
}

impl PlaceholderTransport {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
        }
    }
}

#[async_trait]
impl Transport for PlaceholderTransport {
    fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn normalize(&self, _raw: serde_json::Value) -> Result<Option<InboundMessage>> {
        Ok(None)
    }

    fn inbound_action(&self, message: &InboundMessage) -> InboundAction {
        if !message.has_text() {
            InboundAction::PlaceholderReply
        } else {
            InboundAction::RuntimeSubmit
        }
    }

    async fn deliver(&self, payload: OutboundPayload) -> Result<DeliveryDescriptor> {
        // No real SDK to call; acknowledge with a synthetic descriptor so
        // callers (e.g. the Approvals Bridge) can still treat this as a
        // normal send for idempotency bookkeeping.
        Ok(DeliveryDescriptor {
            message_id: payload.idempotency_key.unwrap_or_else(|| "placeholder".into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InboundEnvelope, Peer, PeerKind};

    fn msg(text: &str) -> InboundMessage {
        InboundMessage {
            channel_id: "xmtp".into(),
            account_id: "acct".into(),
            peer: Peer {
                kind: PeerKind::Dm,
                id: "peer".into(),
                thread_id: None,
            },
            sender: "peer".into(),
            message: InboundEnvelope {
                id: "1".into(),
                text: text.into(),
                timestamp: 0,
                reply_to_id: None,
            },
            raw: serde_json::Value::Null,
            meta: serde_json::Value::Null,
        }
    }

    #[test]
    fn placeholder_transport_requests_placeholder_reply_for_empty_text() {
        let t = PlaceholderTransport::new("xmtp");
        assert_eq!(t.inbound_action(&msg("")), InboundAction::PlaceholderReply);
        assert_eq!(t.inbound_action(&msg("hi")), InboundAction::RuntimeSubmit);
    }
}
