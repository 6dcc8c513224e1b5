//! Run Submitter / Waiter (component L, §4.12): submit a [`Job`] to a
//! [`Router`] and block until a terminal event lands on `run:<run_id>`,
//! or time out. Used directly by Transport Ingest and by the Heartbeat
//! Manager's timer-based (sub-minute) scheduling path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::bus::{run_topic, Bus, Event};
use crate::error::{FabricError, Result};
use crate::model::Job;
use crate::router::Router;

/// Outcome of a completed (or timed-out) wait. Matches §4.12's waiter
/// contract: `{ok, output_string} | {error, string} | timeout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Ok(String),
    Error(String),
    Timeout,
}

impl WaitOutcome {
    /// §4.12: the answer is truncated to 1000 characters before it ever
    /// leaves the waiter.
    const MAX_ANSWER_CHARS: usize = 1000;

    fn from_answer(answer: String) -> Self {
        let truncated: String = answer.chars().take(Self::MAX_ANSWER_CHARS).collect();
        WaitOutcome::Ok(truncated)
    }
}

/// An optional collaborator that records a submitted-and-waited run into
/// some external memory (transcript, audit log, ...). The waiter calls
/// this on every path — success, error, and timeout — matching §4.12 step
/// 4 ("on all paths ... append a memory record").
#[async_trait]
pub trait MemoryCollaborator: Send + Sync {
    async fn record(&self, session_key: &str, prompt: &str, outcome: &WaitOutcome);
}

pub struct RunWaiter {
    bus: Arc<Bus>,
    memory: Option<Arc<dyn MemoryCollaborator>>,
}

impl RunWaiter {
    pub fn new(bus: Arc<Bus>) -> Self {
        Self { bus, memory: None }
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryCollaborator>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Submit `job` through `router` and wait for its terminal event.
    pub async fn submit_and_wait(&self, router: &dyn Router, job: Job) -> WaitOutcome {
        let session_key = job.session_key.clone();
        let prompt = job.prompt.clone();
        let timeout_ms = job.timeout_ms;

        let mut topic = run_topic(&job.run_id);
        let (mut sub_id, mut rx) = self.bus.subscribe(&topic).await;

        let outcome = match router.submit(job).await {
            Err(e) => WaitOutcome::Error(e.to_string()),
            Ok(submission) => {
                if submission.run_id != topic.trim_start_matches("run:") {
                    // Router minted its own run id — move the subscription.
                    self.bus.unsubscribe(&topic, sub_id).await;
                    topic = run_topic(&submission.run_id);
                    let (new_id, new_rx) = self.bus.subscribe(&topic).await;
                    sub_id = new_id;
                    rx = new_rx;
                }

                let wait = tokio::time::timeout(
                    Duration::from_millis(timeout_ms),
                    Self::wait_terminal(&mut rx),
                )
                .await;
                match wait {
                    Ok(Some(WaitOutcome::Ok(answer))) => WaitOutcome::from_answer(answer),
                    Ok(Some(other)) => other,
                    Ok(None) => WaitOutcome::Error("router closed without a terminal event".into()),
                    Err(_) => WaitOutcome::Timeout,
                }
            }
        };

        self.bus.unsubscribe(&topic, sub_id).await;

        if let Some(memory) = &self.memory {
            memory.record(&session_key, &prompt, &outcome).await;
        }

        outcome
    }

    async fn wait_terminal(rx: &mut tokio::sync::mpsc::Receiver<Event>) -> Option<WaitOutcome> {
        while let Some(ev) = rx.recv().await {
            match ev.event_type.as_str() {
                "run_completed" => {
                    let ok = ev.payload.get("ok").and_then(|v| v.as_bool()).unwrap_or(true);
                    if ok {
                        let answer = ev.payload["answer"].as_str().unwrap_or_default().to_string();
                        return Some(WaitOutcome::Ok(answer));
                    }
                    let error = ev
                        .payload
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("run failed")
                        .to_string();
                    return Some(WaitOutcome::Error(error));
                }
                "run_failed" => {
                    let reason = ev
                        .payload
                        .get("reason")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown error")
                        .to_string();
                    return Some(WaitOutcome::Error(reason));
                }
                _ => continue,
            }
        }
        None
    }
}

/// Cancel a run's in-flight wait by asking the router to cancel it.
/// Outstanding waiters still observe the normal terminal path (either a
/// `run_failed{reason: aborted}` event or their own timeout) — this is
/// deliberately best-effort per §5.
pub async fn cancel_run(router: &dyn Router, run_id: &str) {
    router.cancel(run_id).await;
}

pub fn locked_error() -> FabricError {
    FabricError::Unavailable("waiter: router unavailable".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QueueMode;
    use crate::router::EchoRouter;
    use serde_json::Value;
    use std::sync::Mutex;

    fn job(run_id: &str) -> Job {
        Job {
            run_id: run_id.to_string(),
            session_key: "agent:a:main".into(),
            prompt: "hello".into(),
            agent_id: "a".into(),
            engine_hint: None,
            queue_mode: QueueMode::Collect,
            cwd: None,
            tool_policy: None,
            timeout_ms: 1000,
            meta: Value::Null,
        }
    }

    struct RecordingMemory {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl MemoryCollaborator for RecordingMemory {
        async fn record(&self, session_key: &str, prompt: &str, _outcome: &WaitOutcome) {
            self.calls
                .lock()
                .unwrap()
                .push((session_key.to_string(), prompt.to_string()));
        }
    }

    #[tokio::test]
    async fn submit_and_wait_returns_truncated_answer() {
        let bus = Arc::new(Bus::new());
        let router = EchoRouter::new(bus.clone());
        let waiter = RunWaiter::new(bus.clone());
        let outcome = waiter.submit_and_wait(&router, job("run1")).await;
        assert_eq!(outcome, WaitOutcome::Ok("hello".to_string()));
    }

    #[tokio::test]
    async fn submit_and_wait_records_memory_on_completion() {
        let bus = Arc::new(Bus::new());
        let router = EchoRouter::new(bus.clone());
        let memory = Arc::new(RecordingMemory {
            calls: Mutex::new(Vec::new()),
        });
        let waiter = RunWaiter::new(bus.clone()).with_memory(memory.clone());
        waiter.submit_and_wait(&router, job("run2")).await;
        let calls = memory.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "hello");
    }

    struct NeverRespondingRouter;

    #[async_trait]
    impl Router for NeverRespondingRouter {
        async fn submit(&self, job: Job) -> Result<crate::router::RouterSubmission> {
            Ok(crate::router::RouterSubmission { run_id: job.run_id })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn submit_and_wait_times_out_when_router_never_completes() {
        let bus = Arc::new(Bus::new());
        let router = NeverRespondingRouter;
        let waiter = RunWaiter::new(bus);
        let mut j = job("run3");
        j.timeout_ms = 50;
        let outcome = tokio::time::timeout(Duration::from_secs(5), waiter.submit_and_wait(&router, j))
            .await
            .expect("test itself should not hang");
        assert_eq!(outcome, WaitOutcome::Timeout);
    }
}
