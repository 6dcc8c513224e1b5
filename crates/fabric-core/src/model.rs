//! Shared data model (§3): the records every component reads or writes.
//!
//! These are plain serde structs — Store (component C) persists them as
//! opaque JSON values, the bus broadcasts them inside [`crate::bus::Event`]
//! payloads, and the control plane serializes them straight onto the wire.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A scheduled job's identity. Mutable fields are updated in place by the
/// Cron Manager; `agent_id` and `session_key` are immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CronJob {
    pub id: String,
    pub name: String,
    pub schedule: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub agent_id: String,
    pub session_key: String,
    pub prompt: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub jitter_sec: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub last_run_at_ms: Option<i64>,
    pub next_run_at_ms: Option<i64>,
    #[serde(default)]
    pub meta: Value,
}

fn default_true() -> bool {
    true
}

pub fn default_timezone() -> String {
    "UTC".to_string()
}

pub fn default_timeout_ms() -> u64 {
    300_000
}

impl CronJob {
    /// A heartbeat job is identified by `meta.heartbeat == true` or by the
    /// job name containing "heartbeat" (case-insensitive) — both checks
    /// are preserved per the design document's open question, decided in
    /// DESIGN.md as "support both, `meta.heartbeat` is authoritative."
    pub fn is_heartbeat(&self) -> bool {
        if self.meta.get("heartbeat").and_then(Value::as_bool) == Some(true) {
            return true;
        }
        self.name.to_lowercase().contains("heartbeat")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl RunStatus {
    pub fn is_active(self) -> bool {
        matches!(self, RunStatus::Pending | RunStatus::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Timeout
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Schedule,
    Manual,
    Wake,
}

/// One execution of a [`CronJob`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CronRun {
    pub id: String,
    pub job_id: String,
    pub router_run_id: Option<String>,
    pub status: RunStatus,
    pub started_at_ms: i64,
    pub completed_at_ms: Option<i64>,
    pub duration_ms: Option<i64>,
    pub triggered_by: TriggeredBy,
    pub error: Option<String>,
    pub output: Option<String>,
    #[serde(default)]
    pub suppressed: bool,
    #[serde(default)]
    pub meta: Value,
}

impl CronRun {
    pub fn new(id: String, job_id: String, triggered_by: TriggeredBy, started_at_ms: i64) -> Self {
        Self {
            id,
            job_id,
            router_run_id: None,
            status: RunStatus::Pending,
            started_at_ms,
            completed_at_ms: None,
            duration_ms: None,
            triggered_by,
            error: None,
            output: None,
            suppressed: false,
            meta: Value::Null,
        }
    }

    /// Transition to a terminal state, filling in `completed_at_ms` and the
    /// derived `duration_ms` (invariant 3 in §8 of the design document).
    pub fn finish(&mut self, status: RunStatus, completed_at_ms: i64) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.completed_at_ms = Some(completed_at_ms);
        self.duration_ms = Some(completed_at_ms - self.started_at_ms);
    }
}

/// Per-agent heartbeat probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatConfig {
    pub agent_id: String,
    pub enabled: bool,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_heartbeat_prompt")]
    pub prompt: String,
}

pub fn default_heartbeat_interval_ms() -> u64 {
    60_000
}

pub fn default_heartbeat_prompt() -> String {
    "HEARTBEAT".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatStatus {
    Ok,
    Alert,
}

/// The most recent heartbeat result for an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatLast {
    pub timestamp_ms: i64,
    pub status: HeartbeatStatus,
    pub response: String,
    pub suppressed: bool,
    pub run_id: String,
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    Dm,
    Group,
    Channel,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Peer {
    pub kind: PeerKind,
    pub id: String,
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundEnvelope {
    pub id: String,
    pub text: String,
    pub timestamp: i64,
    pub reply_to_id: Option<String>,
}

/// A normalized channel event, produced by a transport's `normalize`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundMessage {
    pub channel_id: String,
    pub account_id: String,
    pub peer: Peer,
    pub sender: String,
    pub message: InboundEnvelope,
    #[serde(default)]
    pub raw: Value,
    #[serde(default)]
    pub meta: Value,
}

impl InboundMessage {
    /// `text` is empty iff the event has no textual prompt (§3).
    pub fn has_text(&self) -> bool {
        !self.message.text.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    Collect,
    Steer,
    Followup,
    Interrupt,
}

/// A unit of work submitted to the (external) router.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub run_id: String,
    pub session_key: String,
    pub prompt: String,
    pub agent_id: String,
    #[serde(default)]
    pub engine_hint: Option<String>,
    pub queue_mode: QueueMode,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub tool_policy: Option<Value>,
    pub timeout_ms: u64,
    #[serde(default)]
    pub meta: Value,
}

/// `(key, monotonic_ms_observed)` — see [`crate::dedupe`].
#[derive(Debug, Clone, Copy)]
pub struct DedupeEntry {
    pub observed_mono_ms: u64,
}

/// What a transport hands back after delivering an outbound payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundPayload {
    pub channel_id: String,
    pub peer_id: String,
    pub thread_id: Option<String>,
    pub text: String,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryDescriptor {
    pub message_id: String,
}

pub type Meta = HashMap<String, Value>;
