//! In-process topic pub/sub (component B).
//!
//! Generalizes the channel-keyed outbound dispatcher this workspace has
//! shipped before into a topic-keyed bus: any component can `broadcast` an
//! [`Event`] onto an arbitrary topic string and any number of subscribers
//! can `subscribe` to it. Delivery is best-effort and must never block the
//! broadcaster on a slow or dead subscriber — each subscriber gets its own
//! bounded mailbox and a full or closed mailbox is simply dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::clock::now_ms;

/// Default bound for a subscriber's mailbox. Chosen generously: a
/// subscriber that can't keep up with this many pending events is
/// considered dead for the purposes of fan-out.
const SUBSCRIBER_CAPACITY: usize = 256;

/// An envelope broadcast on the bus. `event_type` is the atom-like tag
/// described in §3 of the design document (e.g. `"cron_tick"`,
/// `"run_completed"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub ts_ms: i64,
    pub payload: Value,
    #[serde(default)]
    pub meta: Value,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            ts_ms: now_ms(),
            payload,
            meta: Value::Null,
        }
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }
}

/// `run:<run_id>` — the topic a submitted job's lifecycle events land on.
pub fn run_topic(run_id: &str) -> String {
    format!("run:{run_id}")
}

/// `session:<session_key>` — the topic a session's forwarded/streamed
/// events land on (used by completion forwarding and the EventBridge).
pub fn session_topic(session_key: &str) -> String {
    format!("session:{session_key}")
}

static NEXT_SUB_ID: AtomicU64 = AtomicU64::new(1);

/// A handle returned by [`Bus::subscribe`]; hand it back to
/// [`Bus::unsubscribe`] to stop receiving. Dropping the paired receiver
/// also causes the subscriber to be reaped on the next broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    tx: mpsc::Sender<Event>,
}

type TopicMap = Arc<RwLock<HashMap<String, Vec<Subscriber>>>>;

/// The shared, cloneable bus handle. Every component that needs to publish
/// or subscribe holds an `Arc<Bus>` (or a plain clone — it's cheap).
#[derive(Clone, Default)]
pub struct Bus {
    topics: TopicMap,
}

impl Bus {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Subscribe to `topic`, returning an id to unsubscribe with and a
    /// receiver of events published after this call returns. O(1).
    pub async fn subscribe(&self, topic: impl Into<String>) -> (SubscriptionId, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let id = SubscriptionId(NEXT_SUB_ID.fetch_add(1, Ordering::Relaxed));
        let topic = topic.into();
        let mut topics = self.topics.write().await;
        topics.entry(topic).or_default().push(Subscriber { id, tx });
        (id, rx)
    }

    /// Remove a subscription from a topic. Idempotent — unsubscribing a
    /// handle that isn't registered (or already reaped) is a no-op.
    pub async fn unsubscribe(&self, topic: &str, id: SubscriptionId) {
        let mut topics = self.topics.write().await;
        if let Some(subs) = topics.get_mut(topic) {
            subs.retain(|s| s.id != id);
            if subs.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Fan out `event` to every current subscriber of `topic`. Best-effort:
    /// a full or closed mailbox is dropped (and reaped) rather than
    /// blocking the caller. Returns the number of subscribers it reached.
    pub async fn broadcast(&self, topic: &str, event: Event) -> usize {
        let delivered;
        {
            let topics = self.topics.read().await;
            let Some(subs) = topics.get(topic) else {
                return 0;
            };
            let mut reached = 0;
            for sub in subs {
                match sub.tx.try_send(event.clone()) {
                    Ok(()) => reached += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(topic, "bus: subscriber mailbox full, dropping event");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!(topic, "bus: subscriber gone, will reap");
                    }
                }
            }
            delivered = reached;
        }
        self.reap(topic).await;
        delivered
    }

    /// Drop subscribers whose receiver has been dropped.
    async fn reap(&self, topic: &str) {
        let mut topics = self.topics.write().await;
        if let Some(subs) = topics.get_mut(topic) {
            subs.retain(|s| !s.tx.is_closed());
            if subs.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Number of live subscribers on a topic (mostly for tests/metrics).
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribe_then_broadcast_delivers() {
        let bus = Bus::new();
        let (_id, mut rx) = bus.subscribe("cron").await;
        let n = bus
            .broadcast("cron", Event::new("cron_tick", json!({"ts": 1})))
            .await;
        assert_eq!(n, 1);
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.event_type, "cron_tick");
    }

    #[tokio::test]
    async fn broadcast_with_no_subscribers_is_a_noop() {
        let bus = Bus::new();
        let n = bus.broadcast("nobody-home", Event::new("x", json!({}))).await;
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn dead_subscriber_does_not_block_or_error() {
        let bus = Bus::new();
        let (_id, rx) = bus.subscribe("topic").await;
        drop(rx);
        let n = bus.broadcast("topic", Event::new("x", json!({}))).await;
        assert_eq!(n, 0);
        assert_eq!(bus.subscriber_count("topic").await, 0);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = Bus::new();
        let (id, mut rx) = bus.subscribe("topic").await;
        bus.unsubscribe("topic", id).await;
        bus.broadcast("topic", Event::new("x", json!({}))).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn per_sender_ordering_is_preserved() {
        let bus = Bus::new();
        let (_id, mut rx) = bus.subscribe("topic").await;
        for i in 0..5 {
            bus.broadcast("topic", Event::new("seq", json!({"i": i}))).await;
        }
        for i in 0..5 {
            let ev = rx.recv().await.unwrap();
            assert_eq!(ev.payload["i"], i);
        }
    }

    #[test]
    fn topic_helpers_format_as_expected() {
        assert_eq!(run_topic("run_abc"), "run:run_abc");
        assert_eq!(session_topic("agent:x:main"), "session:agent:x:main");
    }
}
