//! Cron Manager (component I): the tick loop, due-set computation,
//! jittered dispatch, run lifecycle, and completion forwarding.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::{json, Value};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::{run_topic, session_topic, Bus, Event};
use crate::clock::{new_id, now_ms};
use crate::cron::schedule::next_run_ms;
use crate::cron::store::{CronStore, ListRunsOpts};
use crate::error::{FabricError, Result};
use crate::model::{
    default_timeout_ms, default_timezone, CronJob, CronRun, Job, QueueMode, RunStatus,
    TriggeredBy,
};
use crate::outbox::ChannelOutbox;
use crate::router::Router;
use crate::session_key::{new_cron_sub_id, SessionKey};

/// How often the manager scans for due jobs. §4.9: 60 seconds.
pub const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Maximum bytes of a forwarded completion summary (§4.9).
pub const MAX_FORWARD_BYTES: usize = 12_000;

const RUN_SUMMARY_MARKER: &str = "RUN SUMMARY";

#[derive(Debug, Clone, Default)]
pub struct AddJobParams {
    pub name: String,
    pub schedule: String,
    pub agent_id: String,
    pub session_key: String,
    pub prompt: String,
    pub timezone: Option<String>,
    pub jitter_sec: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub meta: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateJobParams {
    pub name: Option<String>,
    pub schedule: Option<String>,
    pub enabled: Option<bool>,
    pub prompt: Option<String>,
    pub jitter_sec: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub meta: Option<Value>,
    /// Present-but-rejected: attempting to patch either of these fails
    /// with `immutable_fields` (§4.9).
    pub agent_id: Option<String>,
    pub session_key: Option<String>,
}

#[derive(Clone)]
pub struct CronManager {
    store: CronStore,
    bus: Arc<Bus>,
    router: Arc<dyn Router>,
    outbox: Option<Arc<dyn ChannelOutbox>>,
}

impl CronManager {
    pub fn new(store: CronStore, bus: Arc<Bus>, router: Arc<dyn Router>) -> Self {
        Self {
            store,
            bus,
            router,
            outbox: None,
        }
    }

    pub fn with_outbox(mut self, outbox: Arc<dyn ChannelOutbox>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    pub fn store(&self) -> &CronStore {
        &self.store
    }

    pub async fn list(&self) -> Vec<CronJob> {
        self.store.list_jobs().await
    }

    pub async fn add(&self, params: AddJobParams) -> Result<CronJob> {
        let mut missing = Vec::new();
        if params.name.is_empty() {
            missing.push("name".to_string());
        }
        if params.schedule.is_empty() {
            missing.push("schedule".to_string());
        }
        if params.agent_id.is_empty() {
            missing.push("agent_id".to_string());
        }
        if params.session_key.is_empty() {
            missing.push("session_key".to_string());
        }
        if params.prompt.is_empty() {
            missing.push("prompt".to_string());
        }
        if !missing.is_empty() {
            return Err(FabricError::MissingKeys(missing));
        }

        let timezone = params.timezone.unwrap_or_else(default_timezone);
        let next_run_at_ms = Some(next_run_ms(&params.schedule, &timezone)?);
        let now = now_ms();
        let job = CronJob {
            id: new_id("cron"),
            name: params.name,
            schedule: params.schedule,
            enabled: true,
            agent_id: params.agent_id,
            session_key: params.session_key,
            prompt: params.prompt,
            timezone,
            jitter_sec: params.jitter_sec.unwrap_or(0),
            timeout_ms: params.timeout_ms.unwrap_or_else(default_timeout_ms),
            created_at_ms: now,
            updated_at_ms: now,
            last_run_at_ms: None,
            next_run_at_ms,
            meta: params.meta.unwrap_or(Value::Null),
        };
        self.store.put_job(&job).await?;
        self.bus
            .broadcast("cron", Event::new("cron_job_created", json!(job)))
            .await;
        Ok(job)
    }

    pub async fn update(&self, job_id: &str, params: UpdateJobParams) -> Result<CronJob> {
        let mut immutable = Vec::new();
        if params.agent_id.is_some() {
            immutable.push("agent_id".to_string());
        }
        if params.session_key.is_some() {
            immutable.push("session_key".to_string());
        }
        if !immutable.is_empty() {
            return Err(FabricError::ImmutableFields(immutable));
        }

        let mut job = self
            .store
            .get_job(job_id)
            .await
            .ok_or_else(|| FabricError::NotFound(job_id.to_string()))?;

        let schedule_changed = params.schedule.is_some();
        if let Some(name) = params.name {
            job.name = name;
        }
        if let Some(schedule) = params.schedule {
            job.schedule = schedule;
        }
        if let Some(enabled) = params.enabled {
            job.enabled = enabled;
        }
        if let Some(prompt) = params.prompt {
            job.prompt = prompt;
        }
        if let Some(jitter_sec) = params.jitter_sec {
            job.jitter_sec = jitter_sec;
        }
        if let Some(timeout_ms) = params.timeout_ms {
            job.timeout_ms = timeout_ms;
        }
        if let Some(meta) = params.meta {
            job.meta = meta;
        }

        if schedule_changed {
            job.next_run_at_ms = Some(next_run_ms(&job.schedule, &job.timezone)?);
        }
        job.updated_at_ms = now_ms();

        self.store.put_job(&job).await?;
        self.bus
            .broadcast("cron", Event::new("cron_job_updated", json!(job)))
            .await;
        Ok(job)
    }

    pub async fn remove(&self, job_id: &str) -> Result<()> {
        let job = self
            .store
            .get_job(job_id)
            .await
            .ok_or_else(|| FabricError::NotFound(job_id.to_string()))?;
        self.store.delete_job(job_id).await?;
        if job.is_heartbeat() {
            // Heartbeat config lives in its own table; clearing it here
            // keeps "remove a heartbeat's cron job" and "disable its
            // heartbeat" atomic from the caller's point of view.
            let _ = self
                .store
                .store_ref()
                .delete("heartbeat_config", &job.agent_id)
                .await;
        }
        self.bus
            .broadcast("cron", Event::new("cron_job_deleted", json!({"id": job_id})))
            .await;
        Ok(())
    }

    pub async fn run_now(&self, job_id: &str) -> Result<CronRun> {
        let job = self
            .store
            .get_job(job_id)
            .await
            .ok_or_else(|| FabricError::NotFound(job_id.to_string()))?;
        Ok(self.execute_job(job, TriggeredBy::Manual).await)
    }

    pub async fn runs(&self, job_id: &str, opts: ListRunsOpts) -> Vec<CronRun> {
        self.store.list_runs(job_id, opts).await
    }

    /// Start the tick loop as a background task. Returns a cancellation
    /// token the caller can trigger to stop it.
    pub fn spawn(self: Arc<Self>) -> CancellationToken {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("cron manager: stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        self.tick().await;
                    }
                }
            }
        });
        cancel
    }

    /// One tick: §4.9's five-step algorithm (the final "reschedule next
    /// tick" step is handled by the interval itself).
    pub async fn tick(&self) {
        let ts = now_ms();
        self.bus
            .broadcast("cron", Event::new("cron_tick", json!({"ts": ts})))
            .await;

        let due = self.store.list_due().await;
        for job in &due {
            let job = job.clone();
            let runner = self.clone();
            let delay_ms = if job.jitter_sec > 0 {
                rand::thread_rng().gen_range(1..=job.jitter_sec * 1000)
            } else {
                0
            };
            tokio::spawn(async move {
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                runner.execute_job(job, TriggeredBy::Schedule).await;
            });
        }

        // Regardless of jitter, recompute next_run_at_ms / last_run_at_ms
        // for every due job up front, per step 4.
        for job in due {
            let mut job = job;
            job.last_run_at_ms = Some(ts);
            job.next_run_at_ms = next_run_ms(&job.schedule, &job.timezone).ok();
            if let Err(e) = self.store.put_job(&job).await {
                warn!(job_id = %job.id, error = %e, "cron: failed to persist rescheduled job");
            }
        }
    }

    /// Execute one job to completion. Used both for `run_now` (awaited
    /// directly) and for scheduled dispatch (spawned as a background
    /// task by `tick`).
    pub async fn execute_job(&self, job: CronJob, triggered_by: TriggeredBy) -> CronRun {
        let started = now_ms();
        let mut run = CronRun::new(new_id("run"), job.id.clone(), triggered_by, started);
        run.meta = json!({
            "agent_id": job.agent_id,
            "session_key": job.session_key,
            "job_name": job.name,
        });
        let _ = self.store.put_run(&run).await;

        let router_run_id = new_id("run");
        run.router_run_id = Some(router_run_id.clone());
        run.status = RunStatus::Running;
        let _ = self.store.put_run(&run).await;
        self.bus
            .broadcast("cron", Event::new("cron_run_started", json!(run)))
            .await;

        // Submit on a forked sub-session so the run's own conversation
        // doesn't pollute the base session; completion is mirrored back
        // onto the base session below.
        let exec_session_key = SessionKey::parse(&job.session_key).fork(new_cron_sub_id());
        let topic = run_topic(&router_run_id);
        let (sub_id, mut rx) = self.bus.subscribe(&topic).await;

        let submit_result = self
            .router
            .submit(Job {
                run_id: router_run_id.clone(),
                session_key: exec_session_key.synthesize(),
                prompt: job.prompt.clone(),
                agent_id: job.agent_id.clone(),
                engine_hint: None,
                queue_mode: QueueMode::Collect,
                cwd: None,
                tool_policy: None,
                timeout_ms: job.timeout_ms,
                meta: Value::Null,
            })
            .await;

        let outcome = match submit_result {
            Err(e) => Err(e.to_string()),
            Ok(_) => {
                let timeout = Duration::from_millis(job.timeout_ms);
                match tokio::time::timeout(timeout, Self::wait_terminal(&mut rx)).await {
                    Ok(Some(result)) => result,
                    Ok(None) => Err("router closed without a terminal event".to_string()),
                    Err(_) => {
                        run.finish(RunStatus::Timeout, now_ms());
                        run.error = Some("timed out".to_string());
                        self.finish_run(&job, run.clone()).await;
                        self.bus.unsubscribe(&topic, sub_id).await;
                        return run;
                    }
                }
            }
        };

        self.bus.unsubscribe(&topic, sub_id).await;

        match outcome {
            Ok(answer) => {
                run.output = Some(answer);
                run.finish(RunStatus::Completed, now_ms());
            }
            Err(reason) => {
                run.error = Some(reason);
                run.finish(RunStatus::Failed, now_ms());
            }
        }
        self.finish_run(&job, run.clone()).await;
        run
    }

    async fn wait_terminal(rx: &mut tokio::sync::mpsc::Receiver<Event>) -> Option<Result<String, String>>
    where
    {
        while let Some(ev) = rx.recv().await {
            match ev.event_type.as_str() {
                "run_completed" => {
                    let answer = ev.payload["answer"].as_str().unwrap_or_default().to_string();
                    return Some(Ok(answer));
                }
                "run_failed" => {
                    let reason = ev
                        .payload
                        .get("reason")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string();
                    return Some(Err(reason));
                }
                _ => continue,
            }
        }
        None
    }

    async fn finish_run(&self, job: &CronJob, run: CronRun) {
        let _ = self.store.put_run(&run).await;
        self.bus
            .broadcast("cron", Event::new("cron_run_completed", json!(run)))
            .await;
        self.forward_completion(job, &run).await;
    }

    /// §4.9 completion forwarding: push a synthetic `run_completed` onto
    /// the base session's topic so the originating conversation sees the
    /// outcome even though the run itself happened in a forked
    /// sub-session.
    async fn forward_completion(&self, job: &CronJob, run: &CronRun) {
        let key = SessionKey::parse(&job.session_key);
        let base = key.base();
        if matches!(base, SessionKey::Unknown(_)) {
            return;
        }

        let status_str = match run.status {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Timeout => "timeout",
            _ => "unknown",
        };
        let triggered_by_str = match run.triggered_by {
            TriggeredBy::Schedule => "schedule",
            TriggeredBy::Manual => "manual",
            TriggeredBy::Wake => "wake",
        };

        let body = if run.status == RunStatus::Completed {
            let output = run.output.clone().unwrap_or_default();
            match output.find(RUN_SUMMARY_MARKER) {
                Some(idx) => output[idx..].to_string(),
                None => output.trim().to_string(),
            }
        } else {
            format!(
                "Cron run completed with status={}. {}",
                status_str,
                run.error.clone().unwrap_or_default()
            )
        };

        let text = format!(
            "Cron summary: {}\ntriggered_by: {}\nstatus: {}\ncron_run_id: {}\nrouter_run_id: {}\n\n{}",
            job.name,
            triggered_by_str,
            status_str,
            run.id,
            run.router_run_id.clone().unwrap_or_default(),
            body
        );
        let text = truncate_utf8_safe(&text, MAX_FORWARD_BYTES);

        let session_topic_name = session_topic(&base.synthesize());
        self.bus
            .broadcast(
                &session_topic_name,
                Event::new(
                    "run_completed",
                    json!({"ok": run.status == RunStatus::Completed, "answer": text, "synthetic": true}),
                ),
            )
            .await;

        if let SessionKey::ChannelPeer(c) = &base {
            if let Some(outbox) = &self.outbox {
                let payload = crate::model::OutboundPayload {
                    channel_id: c.channel_id.clone(),
                    peer_id: c.peer_id.clone(),
                    thread_id: c.thread_id.clone(),
                    text,
                    idempotency_key: Some(format!("cron_notify_{}", run.id)),
                };
                if let Err(e) = outbox.enqueue(payload).await {
                    warn!(run_id = %run.id, error = %e, "cron: failed to enqueue channel notification");
                }
            }
        }
    }
}

/// Truncate `s` to at most `max_bytes` bytes, backing off to the nearest
/// valid UTF-8 boundary rather than splitting a multi-byte codepoint.
pub fn truncate_utf8_safe(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::EchoRouter;
    use crate::store::Store;

    fn manager(bus: Arc<Bus>) -> CronManager {
        let dir = tempfile::tempdir().unwrap();
        let store = CronStore::new(Store::new(dir.path().to_path_buf()));
        // Leak the tempdir by forgetting it so it lives for the test.
        std::mem::forget(dir);
        let router = Arc::new(EchoRouter::new(bus.clone()));
        CronManager::new(store, bus, router)
    }

    #[tokio::test]
    async fn add_requires_all_fields() {
        let bus = Arc::new(Bus::new());
        let mgr = manager(bus);
        let err = mgr
            .add(AddJobParams {
                name: "".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "missing_keys");
    }

    #[tokio::test]
    async fn add_rejects_invalid_schedule() {
        let bus = Arc::new(Bus::new());
        let mgr = manager(bus);
        let err = mgr
            .add(AddJobParams {
                name: "n".into(),
                schedule: "garbage".into(),
                agent_id: "a".into(),
                session_key: "agent:a:main".into(),
                prompt: "p".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_schedule");
    }

    #[tokio::test]
    async fn update_rejects_immutable_fields() {
        let bus = Arc::new(Bus::new());
        let mgr = manager(bus);
        let job = mgr
            .add(AddJobParams {
                name: "n".into(),
                schedule: "*/5 * * * *".into(),
                agent_id: "a".into(),
                session_key: "agent:a:main".into(),
                prompt: "p".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let err = mgr
            .update(
                &job.id,
                UpdateJobParams {
                    agent_id: Some("other".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "immutable_fields");
        let unchanged = mgr.store.get_job(&job.id).await.unwrap();
        assert_eq!(unchanged.agent_id, "a");
    }

    #[tokio::test]
    async fn run_now_produces_a_completed_run() {
        let bus = Arc::new(Bus::new());
        let mgr = manager(bus);
        let job = mgr
            .add(AddJobParams {
                name: "n".into(),
                schedule: "*/5 * * * *".into(),
                agent_id: "a".into(),
                session_key: "agent:a:main".into(),
                prompt: "hello".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let run = mgr.run_now(&job.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.triggered_by, TriggeredBy::Manual);
        assert_eq!(run.output.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn remove_clears_heartbeat_config_for_heartbeat_jobs() {
        let bus = Arc::new(Bus::new());
        let mgr = manager(bus);
        let mut job = mgr
            .add(AddJobParams {
                name: "heartbeat-a".into(),
                schedule: "*/1 * * * *".into(),
                agent_id: "a".into(),
                session_key: "agent:a:heartbeat".into(),
                prompt: "HEARTBEAT".into(),
                meta: Some(json!({"heartbeat": true})),
                ..Default::default()
            })
            .await
            .unwrap();
        job.meta = json!({"heartbeat": true});
        mgr.store
            .store_ref()
            .put("heartbeat_config", "a", json!({"agent_id": "a", "enabled": true}))
            .await
            .unwrap();
        mgr.remove(&job.id).await.unwrap();
        assert!(mgr.store.store_ref().get("heartbeat_config", "a").await.is_none());
    }

    #[test]
    fn truncate_respects_utf8_boundaries() {
        let s = "a".repeat(10) + "é"; // é is 2 bytes
        let truncated = truncate_utf8_safe(&s, 11);
        assert!(truncated.is_char_boundary(truncated.len()));
        assert!(truncated.len() <= 11);
    }

    #[test]
    fn truncate_is_noop_when_within_bound() {
        assert_eq!(truncate_utf8_safe("short", 100), "short");
    }
}
