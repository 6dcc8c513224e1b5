//! Heartbeat Manager (component J, §4.10): per-agent liveness probing.
//!
//! A heartbeat is either a cron job (intervals ≥ 60 s, the common case —
//! it rides the Cron Manager's own tick/execute/forward machinery) or a
//! direct timer loop (sub-minute intervals, submitted straight to the
//! router since a cron schedule can't express sub-minute cadences). Both
//! paths converge on the same classification and suppression logic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::{Bus, Event};
use crate::clock::{new_id, now_ms};
use crate::cron::manager::{AddJobParams, UpdateJobParams};
use crate::cron::CronManager;
use crate::error::Result;
use crate::model::{HeartbeatConfig, HeartbeatLast, HeartbeatStatus, Job, QueueMode};
use crate::router::Router;
use crate::store::Store;

/// The exact string a heartbeat probe must produce, verbatim after
/// trimming, to be considered healthy and suppressed (§4.10).
pub const HEARTBEAT_OK: &str = "HEARTBEAT_OK";

/// Below this interval a cron schedule can't express the cadence; use a
/// direct timer loop instead.
const CRON_FLOOR_MS: u64 = 60_000;
const HOUR_MS: u64 = 3_600_000;

fn cron_job_name(agent_id: &str) -> String {
    format!("heartbeat-{agent_id}")
}

fn heartbeat_session_key(agent_id: &str) -> String {
    format!("agent:{agent_id}:heartbeat")
}

/// Derive a 5-field cron schedule from an interval (§4.10): hourly
/// granularity once the interval reaches an hour, otherwise minutes
/// rounded to the nearest whole minute (minimum one).
fn schedule_for_interval(interval_ms: u64) -> String {
    if interval_ms >= HOUR_MS {
        let hours = (interval_ms / HOUR_MS).max(1);
        format!("0 */{hours} * * *")
    } else {
        let minutes = ((interval_ms + 30_000) / 60_000).max(1);
        format!("*/{minutes} * * * *")
    }
}

pub struct HeartbeatManager {
    store: Store,
    bus: Arc<Bus>,
    cron: Arc<CronManager>,
    router: Arc<dyn Router>,
    timers: Mutex<HashMap<String, CancellationToken>>,
}

impl HeartbeatManager {
    pub fn new(store: Store, bus: Arc<Bus>, cron: Arc<CronManager>, router: Arc<dyn Router>) -> Self {
        Self {
            store,
            bus,
            cron,
            router,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Rehydrate every enabled heartbeat from `heartbeat_config` on
    /// manager start, recreating cron jobs or timers as needed.
    pub async fn start(self: &Arc<Self>) {
        for (agent_id, value) in self.store.list("heartbeat_config").await {
            let Ok(config) = serde_json::from_value::<HeartbeatConfig>(value) else {
                warn!(agent_id, "heartbeat: failed to parse stored config, skipping");
                continue;
            };
            if config.enabled {
                if let Err(e) = self.apply_config(&config).await {
                    warn!(agent_id, error = %e, "heartbeat: failed to rehydrate");
                }
            }
        }
    }

    /// §4.10's configuration entry point.
    pub async fn update_config(&self, agent_id: &str, config: HeartbeatConfig) -> Result<()> {
        self.store
            .put("heartbeat_config", agent_id, json!(config))
            .await?;

        self.cancel_timer(agent_id).await;

        if config.enabled {
            self.apply_config(&config).await?;
        } else {
            let job_name = cron_job_name(agent_id);
            if let Some(job) = self
                .cron
                .list()
                .await
                .into_iter()
                .find(|j| j.name == job_name)
            {
                self.cron.remove(&job.id).await?;
            }
        }
        Ok(())
    }

    async fn apply_config(&self, config: &HeartbeatConfig) -> Result<()> {
        if config.interval_ms >= CRON_FLOOR_MS {
            self.ensure_cron_job(config).await?;
        } else {
            self.start_timer(config.clone()).await;
        }
        Ok(())
    }

    async fn ensure_cron_job(&self, config: &HeartbeatConfig) -> Result<()> {
        let job_name = cron_job_name(&config.agent_id);
        let schedule = schedule_for_interval(config.interval_ms);
        let meta = json!({"heartbeat": true, "agent_id": config.agent_id, "interval_ms": config.interval_ms});
        let session_key = heartbeat_session_key(&config.agent_id);

        let existing = self.cron.list().await.into_iter().find(|j| j.name == job_name);
        match existing {
            Some(job) => {
                self.cron
                    .update(
                        &job.id,
                        UpdateJobParams {
                            schedule: Some(schedule),
                            prompt: Some(config.prompt.clone()),
                            enabled: Some(true),
                            meta: Some(meta),
                            timeout_ms: Some(30_000),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            None => {
                self.cron
                    .add(AddJobParams {
                        name: job_name,
                        schedule,
                        agent_id: config.agent_id.clone(),
                        session_key,
                        prompt: config.prompt.clone(),
                        timezone: Some("UTC".to_string()),
                        timeout_ms: Some(30_000),
                        meta: Some(meta),
                        ..Default::default()
                    })
                    .await?;
            }
        }
        Ok(())
    }

    async fn cancel_timer(&self, agent_id: &str) {
        if let Some(token) = self.timers.lock().await.remove(agent_id) {
            token.cancel();
        }
    }

    async fn start_timer(&self, config: HeartbeatConfig) {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let agent_id = config.agent_id.clone();
        let store = self.store.clone();
        let bus = self.bus.clone();
        let router = self.router.clone();

        tokio::spawn(async move {
            let interval = Duration::from_millis(config.interval_ms.max(1));
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!(agent_id, "heartbeat: timer cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(interval) => {
                        fire_timer_probe(&store, &bus, router.as_ref(), &config).await;
                    }
                }
            }
        });

        self.timers.lock().await.insert(agent_id, cancel);
    }

    /// Subscribes to the `"cron"` bus topic and feeds every
    /// `cron_run_completed` event to [`Self::on_cron_run_completed`]. This
    /// is the only thing that drives heartbeat classification/suppression
    /// for cron-backed heartbeats (intervals >= 60s); spawn it once
    /// alongside `start`.
    pub async fn watch_cron(self: Arc<Self>) {
        let (_sub_id, mut rx) = self.bus.subscribe("cron").await;
        while let Some(ev) = rx.recv().await {
            if ev.event_type == "cron_run_completed" {
                self.on_cron_run_completed(&ev).await;
            }
        }
    }

    /// Handle a completed cron run that belongs to a heartbeat job.
    /// Subscribe this to the `"cron"` bus topic's `cron_run_completed`
    /// events and call it for any run whose job is a heartbeat.
    pub async fn on_cron_run_completed(&self, run_event: &Event) {
        let Some(job_id) = run_event.payload.get("job_id").and_then(|v| v.as_str()) else {
            return;
        };
        let Some(job) = self.cron.store().get_job(job_id).await else {
            return;
        };
        if !job.is_heartbeat() {
            return;
        }

        let response = run_event
            .payload
            .get("output")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let run_id = run_event
            .payload
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        self.record_result(&job.agent_id, &run_id, Some(job_id.to_string()), response)
            .await;
    }

    async fn record_result(&self, agent_id: &str, run_id: &str, job_id: Option<String>, response: String) {
        let suppressed = response.trim() == HEARTBEAT_OK;
        let status = if suppressed {
            HeartbeatStatus::Ok
        } else {
            HeartbeatStatus::Alert
        };

        let last = HeartbeatLast {
            timestamp_ms: now_ms(),
            status,
            response: response.clone(),
            suppressed,
            run_id: run_id.to_string(),
            job_id,
        };
        if let Err(e) = self.store.put("heartbeat_last", agent_id, json!(last)).await {
            warn!(agent_id, error = %e, "heartbeat: failed to persist last result");
        }

        if suppressed {
            self.bus
                .broadcast(
                    "system",
                    Event::new("heartbeat_suppressed", json!({"agent_id": agent_id, "run_id": run_id})),
                )
                .await;
        } else {
            self.bus
                .broadcast(
                    "system",
                    Event::new(
                        "heartbeat_alert",
                        json!({"agent_id": agent_id, "run_id": run_id, "response": response, "severity": "warning"}),
                    ),
                )
                .await;
        }
    }

    pub async fn last(&self, agent_id: &str) -> Option<HeartbeatLast> {
        self.store
            .get("heartbeat_last", agent_id)
            .await
            .and_then(|v| serde_json::from_value(v).ok())
    }
}

/// Sub-minute timer path: submit the probe directly to the router (no
/// cron job, no forked sub-session) and classify the result the same way
/// a cron-driven completion would be.
async fn fire_timer_probe(store: &Store, bus: &Arc<Bus>, router: &dyn Router, config: &HeartbeatConfig) {
    let run_id = new_id("run");
    let session_key = heartbeat_session_key(&config.agent_id);
    let topic = crate::bus::run_topic(&run_id);
    let (sub_id, mut rx) = bus.subscribe(&topic).await;

    let job = Job {
        run_id: run_id.clone(),
        session_key,
        prompt: config.prompt.clone(),
        agent_id: config.agent_id.clone(),
        engine_hint: None,
        queue_mode: QueueMode::Collect,
        cwd: None,
        tool_policy: None,
        timeout_ms: 30_000,
        meta: json!({"heartbeat": true}),
    };

    let response = match router.submit(job).await {
        Err(e) => {
            bus.unsubscribe(&topic, sub_id).await;
            warn!(agent_id = config.agent_id, error = %e, "heartbeat: timer probe submit failed");
            return;
        }
        Ok(_) => {
            let wait = tokio::time::timeout(Duration::from_millis(30_000), async {
                while let Some(ev) = rx.recv().await {
                    match ev.event_type.as_str() {
                        "run_completed" => {
                            return ev.payload.get("answer").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                        }
                        "run_failed" => {
                            return ev.payload.get("reason").and_then(|v| v.as_str()).unwrap_or("unknown error").to_string();
                        }
                        _ => continue,
                    }
                }
                String::new()
            })
            .await;
            bus.unsubscribe(&topic, sub_id).await;
            match wait {
                Ok(text) => text,
                Err(_) => "timed out".to_string(),
            }
        }
    };

    let suppressed = response.trim() == HEARTBEAT_OK;
    let status = if suppressed { HeartbeatStatus::Ok } else { HeartbeatStatus::Alert };
    let last = HeartbeatLast {
        timestamp_ms: now_ms(),
        status,
        response: response.clone(),
        suppressed,
        run_id: run_id.clone(),
        job_id: None,
    };
    let _ = store.put("heartbeat_last", &config.agent_id, json!(last)).await;

    if suppressed {
        bus.broadcast(
            "system",
            Event::new("heartbeat_suppressed", json!({"agent_id": config.agent_id, "run_id": run_id})),
        )
        .await;
    } else {
        bus.broadcast(
            "system",
            Event::new(
                "heartbeat_alert",
                json!({"agent_id": config.agent_id, "run_id": run_id, "response": response, "severity": "warning"}),
            ),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::EchoRouter;

    fn manager() -> (Arc<HeartbeatManager>, Arc<Bus>) {
        let bus = Arc::new(Bus::new());
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().to_path_buf());
        std::mem::forget(dir);
        let cron_store = crate::cron::CronStore::new(store.clone());
        let router: Arc<dyn Router> = Arc::new(EchoRouter::new(bus.clone()));
        let cron = Arc::new(CronManager::new(cron_store, bus.clone(), router.clone()));
        let mgr = Arc::new(HeartbeatManager::new(store, bus.clone(), cron, router));
        (mgr, bus)
    }

    #[test]
    fn schedule_for_interval_uses_hours_above_threshold() {
        assert_eq!(schedule_for_interval(3_600_000), "0 */1 * * *");
        assert_eq!(schedule_for_interval(7_200_000), "0 */2 * * *");
    }

    #[test]
    fn schedule_for_interval_rounds_minutes_below_threshold() {
        assert_eq!(schedule_for_interval(60_000), "*/1 * * * *");
        assert_eq!(schedule_for_interval(150_000), "*/3 * * * *");
    }

    #[tokio::test]
    async fn update_config_above_floor_creates_a_cron_job() {
        let (mgr, _bus) = manager();
        mgr.update_config(
            "agent-a",
            HeartbeatConfig {
                agent_id: "agent-a".into(),
                enabled: true,
                interval_ms: 300_000,
                prompt: "HEARTBEAT".into(),
            },
        )
        .await
        .unwrap();

        let jobs = mgr.cron.list().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "heartbeat-agent-a");
        assert!(jobs[0].is_heartbeat());
    }

    #[tokio::test]
    async fn record_result_suppresses_exact_heartbeat_ok() {
        let (mgr, bus) = manager();
        let (_id, mut rx) = bus.subscribe("system").await;
        mgr.record_result("agent-a", "run1", None, "  HEARTBEAT_OK  ".to_string()).await;
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.event_type, "heartbeat_suppressed");
        let last = mgr.last("agent-a").await.unwrap();
        assert!(last.suppressed);
        assert_eq!(last.status, HeartbeatStatus::Ok);
    }

    #[tokio::test]
    async fn record_result_alerts_on_any_other_response() {
        let (mgr, bus) = manager();
        let (_id, mut rx) = bus.subscribe("system").await;
        mgr.record_result("agent-a", "run2", None, "something broke".to_string()).await;
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.event_type, "heartbeat_alert");
        let last = mgr.last("agent-a").await.unwrap();
        assert!(!last.suppressed);
        assert_eq!(last.status, HeartbeatStatus::Alert);
    }

    #[tokio::test]
    async fn record_result_does_not_suppress_near_miss_text() {
        let (mgr, _bus) = manager();
        mgr.record_result("agent-a", "run3", None, "HEARTBEAT_OK!".to_string()).await;
        let last = mgr.last("agent-a").await.unwrap();
        assert!(!last.suppressed);
    }
}
