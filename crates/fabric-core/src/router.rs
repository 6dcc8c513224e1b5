//! The Router: an external collaborator (§1 Non-goals — "specifying how
//! agent runs are executed" is explicitly out of scope). This module only
//! defines the contract every component above it submits jobs through,
//! plus one concrete, test-friendly default implementation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::warn;

use crate::agent::AgentLoop;
use crate::bus::{run_topic, Bus, Event};
use crate::error::Result;
use crate::model::Job;

#[derive(Debug, Clone)]
pub struct RouterSubmission {
    pub run_id: String,
}

/// Anything that can accept a [`Job`] and, asynchronously, drive it to
/// completion by broadcasting lifecycle events on `bus.run_topic(run_id)`:
/// `run_started`, any number of `delta`, then exactly one of
/// `run_completed` / `run_failed`.
///
/// The Run Submitter/Waiter (component L) never talks to the router again
/// after `submit` returns — everything else happens over the bus.
#[async_trait]
pub trait Router: Send + Sync {
    async fn submit(&self, job: Job) -> Result<RouterSubmission>;

    /// Best-effort cancellation of an in-flight run. Routers that can't
    /// cancel mid-flight may treat this as a no-op; the waiter will still
    /// observe a timeout.
    async fn cancel(&self, _run_id: &str) {}
}

/// A minimal router used for local smoke-testing and as the crate's
/// built-in default: it doesn't call out to any LLM, it just echoes the
/// prompt back as the answer after a trivial amount of work, so the rest
/// of the fabric (cron, heartbeat, transports, control plane) can be
/// exercised end-to-end without a real engine wired in.
pub struct EchoRouter {
    bus: Arc<Bus>,
}

impl EchoRouter {
    pub fn new(bus: Arc<Bus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Router for EchoRouter {
    async fn submit(&self, job: Job) -> Result<RouterSubmission> {
        let run_id = job.run_id.clone();
        let bus = self.bus.clone();
        let topic = run_topic(&run_id);
        tokio::spawn(async move {
            bus.broadcast(
                &topic,
                Event::new("run_started", json!({"run_id": run_id.clone()})),
            )
            .await;
            let answer = job.prompt.clone();
            bus.broadcast(
                &topic,
                Event::new(
                    "run_completed",
                    json!({"run_id": run_id, "ok": true, "answer": answer}),
                ),
            )
            .await;
        });
        Ok(RouterSubmission {
            run_id: job.run_id,
        })
    }

    async fn cancel(&self, run_id: &str) {
        warn!(run_id, "EchoRouter does not support mid-flight cancellation");
    }
}

/// The fabric's own router (§10.5): wraps a single [`AgentLoop`] and drives
/// every submitted job through it on its own spawned task, broadcasting the
/// lifecycle events every other component (Run Waiter, Cron Manager,
/// EventBridge) listens for on `bus.run_topic(run_id)`.
///
/// `AgentLoop::process` takes `&mut self` and isn't reentrant, so jobs are
/// serialized through one `tokio::sync::Mutex` — the loop itself is the
/// bottleneck (one LLM call in flight at a time), matching how the teacher
/// crate has always run a single conversational loop per process.
pub struct SimpleRouter {
    bus: Arc<Bus>,
    agent: Arc<Mutex<AgentLoop>>,
}

impl SimpleRouter {
    pub fn new(bus: Arc<Bus>, agent: Arc<Mutex<AgentLoop>>) -> Self {
        Self { bus, agent }
    }
}

#[async_trait]
impl Router for SimpleRouter {
    async fn submit(&self, job: Job) -> Result<RouterSubmission> {
        let run_id = job.run_id.clone();
        let bus = self.bus.clone();
        let agent = self.agent.clone();
        let topic = run_topic(&run_id);

        tokio::spawn(async move {
            bus.broadcast(
                &topic,
                Event::new("run_started", json!({"run_id": run_id.clone()})),
            )
            .await;

            let result = {
                let mut agent = agent.lock().await;
                agent.process(&job.prompt, &job.session_key).await
            };

            match result {
                Ok(answer) => {
                    bus.broadcast(
                        &topic,
                        Event::new(
                            "run_completed",
                            json!({"run_id": run_id, "ok": true, "answer": answer}),
                        ),
                    )
                    .await;
                }
                Err(e) => {
                    bus.broadcast(
                        &topic,
                        Event::new(
                            "run_failed",
                            json!({"run_id": run_id, "reason": e.to_string()}),
                        ),
                    )
                    .await;
                }
            }
        });

        Ok(RouterSubmission {
            run_id: job.run_id,
        })
    }

    async fn cancel(&self, run_id: &str) {
        // The underlying LLM call can't be preempted mid-flight; the job
        // still runs to completion and the waiter's own timeout is the
        // real backstop here, same as `EchoRouter`.
        warn!(run_id, "SimpleRouter does not support mid-flight cancellation");
    }
}

#[cfg(test)]
mod simple_router_tests {
    use super::*;
    use crate::agent::{AgentConfig, AgentLoop};
    use crate::provider::types::{LlmResponse, Usage};
    use crate::provider::LlmProvider;
    use crate::tools::ToolRegistry;
    use async_trait::async_trait;

    struct StubProvider;

    #[async_trait]
    impl LlmProvider for StubProvider {
        async fn chat(
            &self,
            _messages: &[crate::provider::types::ChatMessage],
            _tools: &[crate::provider::types::ToolDefinition],
            _model: Option<&str>,
            _max_tokens: u32,
            _temperature: f32,
        ) -> anyhow::Result<LlmResponse> {
            Ok(LlmResponse {
                content: Some("pong".to_string()),
                tool_calls: vec![],
                finish_reason: "stop".to_string(),
                usage: Usage::default(),
            })
        }

        fn default_model(&self) -> &str {
            "stub-model"
        }
    }

    #[tokio::test]
    async fn submit_runs_job_and_broadcasts_completion() {
        let bus = Arc::new(Bus::new());
        let dir = tempfile::tempdir().unwrap();
        let agent = AgentLoop::new(
            Box::new(StubProvider),
            ToolRegistry::new(),
            AgentConfig {
                model: None,
                max_tokens: 512,
                temperature: 0.0,
                max_iterations: 4,
                workspace: dir.path().to_path_buf(),
            },
        );
        let router = SimpleRouter::new(bus.clone(), Arc::new(Mutex::new(agent)));

        let job = Job {
            run_id: "run_simple_1".into(),
            session_key: "agent:a:main".into(),
            prompt: "ping".into(),
            agent_id: "a".into(),
            engine_hint: None,
            queue_mode: crate::model::QueueMode::Collect,
            cwd: None,
            tool_policy: None,
            timeout_ms: 5000,
            meta: serde_json::Value::Null,
        };

        let (_sub_id, mut rx) = bus.subscribe(&run_topic("run_simple_1")).await;
        router.submit(job).await.unwrap();

        let mut saw_completed = false;
        while let Some(ev) = rx.recv().await {
            if ev.event_type == "run_completed" {
                assert_eq!(ev.payload["answer"], "pong");
                saw_completed = true;
                break;
            }
        }
        assert!(saw_completed);
    }
}
