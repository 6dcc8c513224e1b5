//! Transport Ingest (component K, §4.11): the pipeline every inbound
//! channel event passes through before it becomes a submitted [`Job`] —
//! control-command interception, dedupe, debounce, engine-directive and
//! resume-token extraction, and `Job` synthesis.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock::{new_id, now_ms};
use crate::cron::manager::truncate_utf8_safe;
use crate::dedupe::{Dedupe, DedupeOutcome};
use crate::gateway::transport::{InboundAction, Transport, PLACEHOLDER_MAX_BYTES, PLACEHOLDER_TEXT};
use crate::gateway::waiter::{RunWaiter, WaitOutcome};
use crate::model::{InboundMessage, Job, OutboundPayload, QueueMode};
use crate::router::Router;
use crate::session_key::{PeerKind as KeyPeerKind, SessionKey};
use crate::store::Store;

/// Default quiet period before a debounce buffer flushes.
pub const DEFAULT_DEBOUNCE_MS: u64 = 3_000;
/// Default dedupe TTL for (peer, thread, message_id) keys.
pub const DEFAULT_DEDUPE_TTL_MS: i64 = 10 * 60 * 1000;

const ENGINE_DIRECTIVES: &[&str] = &["lemon", "codex", "claude", "opencode", "pi", "echo"];

/// Strip a leading `/<engine>` directive token from `text`, returning the
/// engine hint (if any) and the remaining prompt.
pub fn strip_engine_directive(text: &str) -> (Option<String>, String) {
    let trimmed = text.trim_start();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return (None, text.to_string());
    };
    let (token, remainder) = match rest.split_once(char::is_whitespace) {
        Some((t, r)) => (t, r.trim_start()),
        None => (rest, ""),
    };
    if ENGINE_DIRECTIVES.contains(&token) {
        (Some(token.to_string()), remainder.to_string())
    } else {
        (None, text.to_string())
    }
}

/// A collaborator that recognizes resume tokens embedded in free text
/// (e.g. `resume:<id>`) and maps them back to the engine that minted
/// them. The default implementation recognizes nothing, matching a
/// deployment with no resumable-engine registry configured.
pub trait EngineRegistry: Send + Sync {
    fn recognize_resume(&self, text: &str) -> Option<(String, String)>;
}

pub struct NoopEngineRegistry;

impl EngineRegistry for NoopEngineRegistry {
    fn recognize_resume(&self, _text: &str) -> Option<(String, String)> {
        None
    }
}

#[derive(Default)]
struct PendingBuffer {
    messages: Vec<InboundMessage>,
    cancel: Option<CancellationToken>,
}

fn buffer_key(msg: &InboundMessage) -> String {
    format!(
        "{}:{}",
        msg.peer.id,
        msg.peer.thread_id.as_deref().unwrap_or("")
    )
}

fn dedupe_key(msg: &InboundMessage) -> String {
    format!(
        "{}:{}:{}",
        msg.peer.id,
        msg.peer.thread_id.as_deref().unwrap_or(""),
        msg.message.id
    )
}

pub struct TransportIngest {
    transport: Arc<dyn Transport>,
    router: Arc<dyn Router>,
    waiter: Arc<RunWaiter>,
    dedupe: Dedupe,
    store: Store,
    engines: Arc<dyn EngineRegistry>,
    agent_id: String,
    debounce_ms: u64,
    dedupe_ttl_ms: i64,
    buffers: Mutex<HashMap<String, PendingBuffer>>,
    active_runs: Mutex<HashMap<String, String>>,
    message_to_run: Mutex<HashMap<String, String>>,
    queue_overrides: Mutex<HashMap<String, QueueMode>>,
}

impl TransportIngest {
    pub fn new(
        transport: Arc<dyn Transport>,
        router: Arc<dyn Router>,
        waiter: Arc<RunWaiter>,
        dedupe: Dedupe,
        store: Store,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            router,
            waiter,
            dedupe,
            store,
            engines: Arc::new(NoopEngineRegistry),
            agent_id: agent_id.into(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            dedupe_ttl_ms: DEFAULT_DEDUPE_TTL_MS,
            buffers: Mutex::new(HashMap::new()),
            active_runs: Mutex::new(HashMap::new()),
            message_to_run: Mutex::new(HashMap::new()),
            queue_overrides: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    pub fn with_engine_registry(mut self, engines: Arc<dyn EngineRegistry>) -> Self {
        self.engines = engines;
        self
    }

    /// Entry point: feed one normalized inbound event through the
    /// pipeline. Returns once the event has been queued, dispatched, or
    /// dropped — it does not block on a triggered run's completion.
    pub async fn handle(self: &Arc<Self>, msg: InboundMessage) {
        if let Some(action) = self.control_command(&msg) {
            self.handle_control(action, &msg).await;
            return;
        }

        match self.transport.inbound_action(&msg) {
            InboundAction::Ignore => return,
            InboundAction::PlaceholderReply => {
                self.send_placeholder(&msg).await;
                return;
            }
            InboundAction::RuntimeSubmit => {}
        }

        let key = dedupe_key(&msg);
        if matches!(
            self.dedupe
                .check_and_mark(&msg.channel_id, &key, self.dedupe_ttl_ms)
                .await,
            DedupeOutcome::Seen
        ) {
            return;
        }

        if msg.message.text.trim_start().starts_with('/') {
            // Slash/command-shaped messages bypass the debounce buffer.
            self.dispatch(vec![msg]).await;
            return;
        }

        self.buffer_and_debounce(msg).await;
    }

    /// Returns `Some` if the message's text names one of the four
    /// recognized control commands (§4.11 item 1).
    fn control_command<'a>(&self, msg: &'a InboundMessage) -> Option<&'a str> {
        let trimmed = msg.message.text.trim();
        for cmd in ["/cancel", "/steer", "/followup", "/interrupt"] {
            if trimmed == cmd || trimmed.starts_with(&format!("{cmd} ")) {
                return Some(cmd);
            }
        }
        None
    }

    async fn handle_control(&self, command: &str, msg: &InboundMessage) {
        let key = buffer_key(msg);
        match command {
            "/cancel" => {
                let target_run = msg
                    .message
                    .reply_to_id
                    .as_ref()
                    .and_then(|id| self.message_to_run.try_lock().ok()?.get(id).cloned());
                if let Some(run_id) = target_run {
                    info!(run_id, "ingest: cancelling run by reply-target message id");
                    self.router.cancel(&run_id).await;
                } else {
                    warn!("ingest: /cancel with no resolvable target run");
                }
            }
            "/steer" => {
                self.queue_overrides.lock().await.insert(key, QueueMode::Steer);
            }
            "/followup" => {
                self.queue_overrides.lock().await.insert(key, QueueMode::Followup);
            }
            "/interrupt" => {
                self.queue_overrides.lock().await.insert(key, QueueMode::Interrupt);
            }
            _ => {}
        }
    }

    async fn send_placeholder(&self, msg: &InboundMessage) {
        let text = truncate_utf8_safe(PLACEHOLDER_TEXT, PLACEHOLDER_MAX_BYTES);
        let payload = OutboundPayload {
            channel_id: msg.channel_id.clone(),
            peer_id: msg.peer.id.clone(),
            thread_id: msg.peer.thread_id.clone(),
            text,
            idempotency_key: Some(format!("placeholder_{}", msg.message.id)),
        };
        if let Err(e) = self.transport.deliver(payload).await {
            warn!(error = %e, "ingest: failed to deliver placeholder reply");
        }
    }

    async fn buffer_and_debounce(self: &Arc<Self>, msg: InboundMessage) {
        let key = buffer_key(&msg);
        let mut buffers = self.buffers.lock().await;
        let entry = buffers.entry(key.clone()).or_default();
        if let Some(cancel) = entry.cancel.take() {
            cancel.cancel();
        }
        entry.messages.push(msg);

        let cancel = CancellationToken::new();
        entry.cancel = Some(cancel.clone());
        drop(buffers);

        let this = self.clone();
        let debounce = Duration::from_millis(self.debounce_ms);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(debounce) => {
                    this.flush(&key).await;
                }
            }
        });
    }

    async fn flush(self: &Arc<Self>, key: &str) {
        let messages = {
            let mut buffers = self.buffers.lock().await;
            match buffers.remove(key) {
                Some(entry) => entry.messages,
                None => return,
            }
        };
        if messages.is_empty() {
            return;
        }
        self.dispatch(messages).await;
    }

    /// Steps 4-6 of §4.11: strip the engine directive, extract a resume
    /// token, synthesize a `Job`, submit it, and deliver the answer back
    /// through the transport once the run completes.
    async fn dispatch(self: &Arc<Self>, messages: Vec<InboundMessage>) {
        let last = messages.last().expect("dispatch called with no messages");
        let correlation_id = last.message.id.clone();
        let channel_id = last.channel_id.clone();
        let peer_id = last.peer.id.clone();
        let thread_id = last.peer.thread_id.clone();

        let combined_text = messages
            .iter()
            .map(|m| m.message.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let (engine_from_head, stripped) = strip_engine_directive(&combined_text);
        let resume = self
            .engines
            .recognize_resume(&combined_text)
            .or_else(|| last.message.reply_to_id.as_ref().and_then(|_| self.engines.recognize_resume(&combined_text)));
        let engine_hint = resume.as_ref().map(|(engine, _)| engine.clone()).or(engine_from_head);

        let peer_kind = match last.peer.kind {
            crate::model::PeerKind::Dm => KeyPeerKind::Dm,
            crate::model::PeerKind::Group => KeyPeerKind::Group,
            crate::model::PeerKind::Channel => KeyPeerKind::Channel,
            crate::model::PeerKind::Unknown => KeyPeerKind::Unknown,
        };
        let session_key = SessionKey::channel_peer(
            &self.agent_id,
            &channel_id,
            &last.account_id,
            peer_kind,
            &peer_id,
            thread_id.clone(),
            None,
        )
        .synthesize();

        let key = buffer_key(last);
        let queue_mode = self
            .queue_overrides
            .lock()
            .await
            .remove(&key)
            .unwrap_or(QueueMode::Collect);

        let run_id = new_id("run");
        for m in &messages {
            self.message_to_run
                .lock()
                .await
                .insert(m.message.id.clone(), run_id.clone());
        }
        self.active_runs.lock().await.insert(session_key.clone(), run_id.clone());

        let job = Job {
            run_id: run_id.clone(),
            session_key: session_key.clone(),
            prompt: stripped,
            agent_id: self.agent_id.clone(),
            engine_hint,
            queue_mode,
            cwd: None,
            tool_policy: None,
            timeout_ms: 300_000,
            meta: serde_json::json!({
                "correlation_id": correlation_id,
                "reply": {"channel_id": channel_id, "peer_id": peer_id, "thread_id": thread_id},
                "resume_token": resume.map(|(_, token)| token),
                "ts_ms": now_ms(),
            }),
        };

        if let Err(e) = self
            .store
            .put(
                "ingest_offsets",
                &key,
                serde_json::json!({"last_message_id": correlation_id, "run_id": run_id}),
            )
            .await
        {
            warn!(error = %e, "ingest: failed to persist offset");
        }

        let outcome = self.waiter.submit_and_wait(self.router.as_ref(), job).await;
        self.active_runs.lock().await.remove(&session_key);

        let text = match outcome {
            WaitOutcome::Ok(answer) => answer,
            WaitOutcome::Error(err) => format!("Request failed: {err}"),
            WaitOutcome::Timeout => "The request timed out.".to_string(),
        };

        let payload = OutboundPayload {
            channel_id,
            peer_id,
            thread_id,
            text,
            idempotency_key: Some(format!("run_reply_{run_id}")),
        };
        if let Err(e) = self.transport.deliver(payload).await {
            warn!(run_id, error = %e, "ingest: failed to deliver run reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_engine_directive_recognizes_known_tokens() {
        let (engine, rest) = strip_engine_directive("/claude do the thing");
        assert_eq!(engine.as_deref(), Some("claude"));
        assert_eq!(rest, "do the thing");
    }

    #[test]
    fn strip_engine_directive_ignores_unknown_tokens() {
        let (engine, rest) = strip_engine_directive("/cancel the run");
        assert_eq!(engine, None);
        assert_eq!(rest, "/cancel the run");
    }

    #[test]
    fn strip_engine_directive_handles_directive_with_no_remainder() {
        let (engine, rest) = strip_engine_directive("/echo");
        assert_eq!(engine.as_deref(), Some("echo"));
        assert_eq!(rest, "");
    }
}
