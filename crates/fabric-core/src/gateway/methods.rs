//! Concrete [`Method`] implementations for the method families §6 marks
//! mandatory, wired against [`GatewayState`] and registered into a
//! [`MethodRegistry`] by [`register_default_methods`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::bus::Event;
use crate::clock::now_ms;
use crate::cron::manager::{AddJobParams, UpdateJobParams};
use crate::cron::store::ListRunsOpts;
use crate::error::{FabricError, Result};
use crate::gateway::registry::{Method, MethodContext, MethodRegistry, ParamField, ParamType, Scope};
use crate::gateway::state::GatewayState;
use crate::gateway::waiter::WaitOutcome;
use crate::model::{HeartbeatConfig, Job, QueueMode, TriggeredBy};

fn str_param(params: &Value, name: &str) -> Result<String> {
    params
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| FabricError::InvalidParams(format!("missing required field `{name}`")))
}

fn opt_str(params: &Value, name: &str) -> Option<String> {
    params.get(name).and_then(Value::as_str).map(str::to_string)
}

pub struct HealthMethod;

#[async_trait]
impl Method for HealthMethod {
    fn name(&self) -> &str {
        "health"
    }
    fn scopes(&self) -> &[Scope] {
        &[]
    }
    async fn handle(&self, _params: Value, _ctx: &MethodContext) -> Result<Value> {
        Ok(json!({"status": "ok", "ts_ms": now_ms()}))
    }
}

/// The actual handshake state transition lives on the per-connection
/// [`crate::gateway::connection::Connection`] owned by the server loop
/// (the registry has no mutable per-connection slot to write into); this
/// method only validates that a role was supplied, so a server loop can
/// call `connection.handshake(role, scopes, client_id)` itself and use
/// `connect`'s presence in the registry purely for method-surface
/// discovery (`features.methods` in `hello_ok`, per §4.15).
pub struct ConnectMethod;

#[async_trait]
impl Method for ConnectMethod {
    fn name(&self) -> &str {
        "connect"
    }
    fn scopes(&self) -> &[Scope] {
        &[]
    }
    fn schema(&self) -> &[ParamField] {
        &[ParamField {
            name: "role",
            param_type: ParamType::String,
        }]
    }
    async fn handle(&self, params: Value, _ctx: &MethodContext) -> Result<Value> {
        Ok(params)
    }
}

pub struct SessionsListMethod(pub Arc<GatewayState>);

#[async_trait]
impl Method for SessionsListMethod {
    fn name(&self) -> &str {
        "sessions.list"
    }
    fn scopes(&self) -> &[Scope] {
        &[Scope::Read]
    }
    async fn handle(&self, _params: Value, _ctx: &MethodContext) -> Result<Value> {
        let sessions = self.0.sessions.lock().await.list_sessions();
        Ok(json!({
            "sessions": sessions.into_iter().map(|(key, updated_at)| json!({"session_key": key, "updated_at": updated_at})).collect::<Vec<_>>()
        }))
    }
}

/// Patches session metadata. Sessions have no mutable fields beyond their
/// message history (§3 has no `Session` record), so this stores whatever
/// mapping the caller sends under the `session_meta` table and hands it
/// back — a seam for callers that want to label or pin a session without
/// this crate needing to know the shape ahead of time.
pub struct SessionsPatchMethod(pub Arc<GatewayState>);

#[async_trait]
impl Method for SessionsPatchMethod {
    fn name(&self) -> &str {
        "sessions.patch"
    }
    fn scopes(&self) -> &[Scope] {
        &[Scope::Write]
    }
    fn schema(&self) -> &[ParamField] {
        &[ParamField {
            name: "session_key",
            param_type: ParamType::String,
        }]
    }
    async fn handle(&self, params: Value, _ctx: &MethodContext) -> Result<Value> {
        let session_key = str_param(&params, "session_key")?;
        let patch = params.get("patch").cloned().unwrap_or(json!({}));
        self.0
            .store
            .put("session_meta", &session_key, patch.clone())
            .await?;
        Ok(json!({"session_key": session_key, "patch": patch}))
    }
}

pub struct SessionsResetMethod(pub Arc<GatewayState>);

#[async_trait]
impl Method for SessionsResetMethod {
    fn name(&self) -> &str {
        "sessions.reset"
    }
    fn scopes(&self) -> &[Scope] {
        &[Scope::Write]
    }
    fn schema(&self) -> &[ParamField] {
        &[ParamField {
            name: "session_key",
            param_type: ParamType::String,
        }]
    }
    async fn handle(&self, params: Value, _ctx: &MethodContext) -> Result<Value> {
        let session_key = str_param(&params, "session_key")?;
        let mut sessions = self.0.sessions.lock().await;
        let session = sessions.get_or_create(&session_key);
        session.clear();
        sessions
            .save(&session_key)
            .map_err(|e| FabricError::InternalError(e.to_string()))?;
        Ok(json!({"session_key": session_key, "reset": true}))
    }
}

pub struct SessionsDeleteMethod(pub Arc<GatewayState>);

#[async_trait]
impl Method for SessionsDeleteMethod {
    fn name(&self) -> &str {
        "sessions.delete"
    }
    fn scopes(&self) -> &[Scope] {
        &[Scope::Admin]
    }
    fn schema(&self) -> &[ParamField] {
        &[ParamField {
            name: "session_key",
            param_type: ParamType::String,
        }]
    }
    async fn handle(&self, params: Value, _ctx: &MethodContext) -> Result<Value> {
        let session_key = str_param(&params, "session_key")?;
        let deleted = self.0.sessions.lock().await.delete(&session_key);
        Ok(json!({"session_key": session_key, "deleted": deleted}))
    }
}

fn submit_job(session_key: String, prompt: String, agent_id: String, run_id: String) -> Job {
    Job {
        run_id,
        session_key,
        prompt,
        agent_id,
        engine_hint: None,
        queue_mode: QueueMode::Collect,
        cwd: None,
        tool_policy: None,
        timeout_ms: 300_000,
        meta: Value::Null,
    }
}

/// `chat.send`: submit straight to the router and block for the answer,
/// the same contract Transport Ingest uses, minus the debounce/dedupe
/// pipeline a direct control-plane caller doesn't need.
pub struct ChatSendMethod(pub Arc<GatewayState>);

#[async_trait]
impl Method for ChatSendMethod {
    fn name(&self) -> &str {
        "chat.send"
    }
    fn scopes(&self) -> &[Scope] {
        &[Scope::Invoke]
    }
    fn schema(&self) -> &[ParamField] {
        &[
            ParamField {
                name: "session_key",
                param_type: ParamType::String,
            },
            ParamField {
                name: "text",
                param_type: ParamType::String,
            },
        ]
    }
    async fn handle(&self, params: Value, _ctx: &MethodContext) -> Result<Value> {
        let session_key = str_param(&params, "session_key")?;
        let text = str_param(&params, "text")?;
        let agent_id = opt_str(&params, "agent_id").unwrap_or_else(|| "default".to_string());
        let run_id = crate::clock::new_id("run");

        self.0
            .active_chats
            .lock()
            .await
            .insert(session_key.clone(), run_id.clone());

        let job = submit_job(session_key.clone(), text, agent_id, run_id);
        let outcome = self.0.waiter.submit_and_wait(self.0.router.as_ref(), job).await;
        self.0.active_chats.lock().await.remove(&session_key);

        match outcome {
            WaitOutcome::Ok(answer) => Ok(json!({"ok": true, "answer": answer})),
            WaitOutcome::Error(err) => Ok(json!({"ok": false, "error": format!("Request failed: {err}")})),
            WaitOutcome::Timeout => Ok(json!({"ok": false, "error": "The request timed out."})),
        }
    }
}

pub struct ChatAbortMethod(pub Arc<GatewayState>);

#[async_trait]
impl Method for ChatAbortMethod {
    fn name(&self) -> &str {
        "chat.abort"
    }
    fn scopes(&self) -> &[Scope] {
        &[Scope::Invoke]
    }
    fn schema(&self) -> &[ParamField] {
        &[ParamField {
            name: "session_key",
            param_type: ParamType::String,
        }]
    }
    async fn handle(&self, params: Value, _ctx: &MethodContext) -> Result<Value> {
        let session_key = str_param(&params, "session_key")?;
        let run_id = self.0.active_chats.lock().await.get(&session_key).cloned();
        match run_id {
            Some(run_id) => {
                self.0.router.cancel(&run_id).await;
                Ok(json!({"session_key": session_key, "run_id": run_id, "aborted": true}))
            }
            None => Err(FabricError::NotFound(format!("no active run for {session_key}"))),
        }
    }
}

pub struct ChatHistoryMethod(pub Arc<GatewayState>);

#[async_trait]
impl Method for ChatHistoryMethod {
    fn name(&self) -> &str {
        "chat.history"
    }
    fn scopes(&self) -> &[Scope] {
        &[Scope::Read]
    }
    fn schema(&self) -> &[ParamField] {
        &[ParamField {
            name: "session_key",
            param_type: ParamType::String,
        }]
    }
    async fn handle(&self, params: Value, _ctx: &MethodContext) -> Result<Value> {
        let session_key = str_param(&params, "session_key")?;
        let limit = params.get("limit").and_then(Value::as_u64).unwrap_or(50) as usize;
        let mut sessions = self.0.sessions.lock().await;
        let session = sessions.get_or_create(&session_key);
        let history = session.get_history(limit);
        Ok(json!({"session_key": session_key, "messages": history}))
    }
}

/// `agent`: fire-and-forget submission — returns as soon as the router
/// accepts the job, without waiting for completion.
pub struct AgentSubmitMethod(pub Arc<GatewayState>);

#[async_trait]
impl Method for AgentSubmitMethod {
    fn name(&self) -> &str {
        "agent"
    }
    fn scopes(&self) -> &[Scope] {
        &[Scope::Invoke]
    }
    fn schema(&self) -> &[ParamField] {
        &[
            ParamField {
                name: "session_key",
                param_type: ParamType::String,
            },
            ParamField {
                name: "prompt",
                param_type: ParamType::String,
            },
        ]
    }
    async fn handle(&self, params: Value, _ctx: &MethodContext) -> Result<Value> {
        let session_key = str_param(&params, "session_key")?;
        let prompt = str_param(&params, "prompt")?;
        let agent_id = opt_str(&params, "agent_id").unwrap_or_else(|| "default".to_string());
        let run_id = crate::clock::new_id("run");
        let job = submit_job(session_key, prompt, agent_id, run_id.clone());
        let submission = self.0.router.submit(job).await?;
        Ok(json!({"run_id": submission.run_id}))
    }
}

/// `agent.wait`: submit and block for the terminal event, per §4.12.
pub struct AgentWaitMethod(pub Arc<GatewayState>);

#[async_trait]
impl Method for AgentWaitMethod {
    fn name(&self) -> &str {
        "agent.wait"
    }
    fn scopes(&self) -> &[Scope] {
        &[Scope::Invoke]
    }
    fn schema(&self) -> &[ParamField] {
        &[
            ParamField {
                name: "session_key",
                param_type: ParamType::String,
            },
            ParamField {
                name: "prompt",
                param_type: ParamType::String,
            },
        ]
    }
    async fn handle(&self, params: Value, _ctx: &MethodContext) -> Result<Value> {
        let session_key = str_param(&params, "session_key")?;
        let prompt = str_param(&params, "prompt")?;
        let agent_id = opt_str(&params, "agent_id").unwrap_or_else(|| "default".to_string());
        let run_id = crate::clock::new_id("run");
        let job = submit_job(session_key, prompt, agent_id, run_id);
        match self.0.waiter.submit_and_wait(self.0.router.as_ref(), job).await {
            WaitOutcome::Ok(answer) => Ok(json!({"ok": true, "answer": answer})),
            WaitOutcome::Error(err) => Ok(json!({"ok": false, "error": format!("Request failed: {err}")})),
            WaitOutcome::Timeout => Ok(json!({"ok": false, "error": "timeout"})),
        }
    }
}

pub struct CronListMethod(pub Arc<GatewayState>);

#[async_trait]
impl Method for CronListMethod {
    fn name(&self) -> &str {
        "cron.list"
    }
    fn scopes(&self) -> &[Scope] {
        &[Scope::Read]
    }
    async fn handle(&self, _params: Value, _ctx: &MethodContext) -> Result<Value> {
        Ok(json!({"jobs": self.0.cron.list().await}))
    }
}

pub struct CronAddMethod(pub Arc<GatewayState>);

#[async_trait]
impl Method for CronAddMethod {
    fn name(&self) -> &str {
        "cron.add"
    }
    fn scopes(&self) -> &[Scope] {
        &[Scope::Write]
    }
    async fn handle(&self, params: Value, _ctx: &MethodContext) -> Result<Value> {
        let add = AddJobParams {
            name: opt_str(&params, "name").unwrap_or_default(),
            schedule: opt_str(&params, "schedule").unwrap_or_default(),
            agent_id: opt_str(&params, "agent_id").unwrap_or_default(),
            session_key: opt_str(&params, "session_key").unwrap_or_default(),
            prompt: opt_str(&params, "prompt").unwrap_or_default(),
            timezone: opt_str(&params, "timezone"),
            jitter_sec: params.get("jitter_sec").and_then(Value::as_u64),
            timeout_ms: params.get("timeout_ms").and_then(Value::as_u64),
            meta: params.get("meta").cloned(),
        };
        Ok(json!(self.0.cron.add(add).await?))
    }
}

pub struct CronUpdateMethod(pub Arc<GatewayState>);

#[async_trait]
impl Method for CronUpdateMethod {
    fn name(&self) -> &str {
        "cron.update"
    }
    fn scopes(&self) -> &[Scope] {
        &[Scope::Write]
    }
    fn schema(&self) -> &[ParamField] {
        &[ParamField {
            name: "id",
            param_type: ParamType::String,
        }]
    }
    async fn handle(&self, params: Value, _ctx: &MethodContext) -> Result<Value> {
        let id = str_param(&params, "id")?;
        let update = UpdateJobParams {
            name: opt_str(&params, "name"),
            schedule: opt_str(&params, "schedule"),
            enabled: params.get("enabled").and_then(Value::as_bool),
            prompt: opt_str(&params, "prompt"),
            jitter_sec: params.get("jitter_sec").and_then(Value::as_u64),
            timeout_ms: params.get("timeout_ms").and_then(Value::as_u64),
            meta: params.get("meta").cloned(),
            agent_id: opt_str(&params, "agent_id"),
            session_key: opt_str(&params, "session_key"),
        };
        Ok(json!(self.0.cron.update(&id, update).await?))
    }
}

pub struct CronRemoveMethod(pub Arc<GatewayState>);

#[async_trait]
impl Method for CronRemoveMethod {
    fn name(&self) -> &str {
        "cron.remove"
    }
    fn scopes(&self) -> &[Scope] {
        &[Scope::Write]
    }
    fn schema(&self) -> &[ParamField] {
        &[ParamField {
            name: "id",
            param_type: ParamType::String,
        }]
    }
    async fn handle(&self, params: Value, _ctx: &MethodContext) -> Result<Value> {
        let id = str_param(&params, "id")?;
        self.0.cron.remove(&id).await?;
        Ok(json!({"id": id, "removed": true}))
    }
}

pub struct CronRunMethod(pub Arc<GatewayState>);

#[async_trait]
impl Method for CronRunMethod {
    fn name(&self) -> &str {
        "cron.run"
    }
    fn scopes(&self) -> &[Scope] {
        &[Scope::Invoke]
    }
    fn schema(&self) -> &[ParamField] {
        &[ParamField {
            name: "id",
            param_type: ParamType::String,
        }]
    }
    async fn handle(&self, params: Value, _ctx: &MethodContext) -> Result<Value> {
        let id = str_param(&params, "id")?;
        Ok(json!(self.0.cron.run_now(&id).await?))
    }
}

pub struct CronRunsMethod(pub Arc<GatewayState>);

#[async_trait]
impl Method for CronRunsMethod {
    fn name(&self) -> &str {
        "cron.runs"
    }
    fn scopes(&self) -> &[Scope] {
        &[Scope::Read]
    }
    fn schema(&self) -> &[ParamField] {
        &[ParamField {
            name: "id",
            param_type: ParamType::String,
        }]
    }
    async fn handle(&self, params: Value, _ctx: &MethodContext) -> Result<Value> {
        let id = str_param(&params, "id")?;
        let opts = ListRunsOpts {
            limit: params.get("limit").and_then(Value::as_u64).map(|n| n as usize),
            status: None,
            since_ms: params.get("since_ms").and_then(Value::as_i64),
        };
        Ok(json!({"runs": self.0.cron.runs(&id, opts).await}))
    }
}

pub struct CronStatusMethod(pub Arc<GatewayState>);

#[async_trait]
impl Method for CronStatusMethod {
    fn name(&self) -> &str {
        "cron.status"
    }
    fn scopes(&self) -> &[Scope] {
        &[Scope::Read]
    }
    fn schema(&self) -> &[ParamField] {
        &[ParamField {
            name: "id",
            param_type: ParamType::String,
        }]
    }
    async fn handle(&self, params: Value, _ctx: &MethodContext) -> Result<Value> {
        let id = str_param(&params, "id")?;
        let job = self
            .0
            .cron
            .store()
            .get_job(&id)
            .await
            .ok_or_else(|| FabricError::NotFound(id.clone()))?;
        let last_run = self
            .0
            .cron
            .runs(&id, ListRunsOpts { limit: Some(1), status: None, since_ms: None })
            .await
            .into_iter()
            .next();
        Ok(json!({"job": job, "last_run": last_run}))
    }
}

pub struct SetHeartbeatsMethod(pub Arc<GatewayState>);

#[async_trait]
impl Method for SetHeartbeatsMethod {
    fn name(&self) -> &str {
        "set-heartbeats"
    }
    fn scopes(&self) -> &[Scope] {
        &[Scope::Admin]
    }
    fn schema(&self) -> &[ParamField] {
        &[
            ParamField {
                name: "agent_id",
                param_type: ParamType::String,
            },
            ParamField {
                name: "enabled",
                param_type: ParamType::Boolean,
            },
        ]
    }
    async fn handle(&self, params: Value, _ctx: &MethodContext) -> Result<Value> {
        let agent_id = str_param(&params, "agent_id")?;
        let enabled = params["enabled"].as_bool().unwrap_or(false);
        let config = HeartbeatConfig {
            agent_id: agent_id.clone(),
            enabled,
            interval_ms: params.get("interval_ms").and_then(Value::as_u64).unwrap_or(60_000),
            prompt: opt_str(&params, "prompt").unwrap_or_else(|| "HEARTBEAT".to_string()),
        };
        self.0.heartbeat.update_config(&agent_id, config).await?;
        Ok(json!({"agent_id": agent_id, "enabled": enabled}))
    }
}

pub struct LastHeartbeatMethod(pub Arc<GatewayState>);

#[async_trait]
impl Method for LastHeartbeatMethod {
    fn name(&self) -> &str {
        "last-heartbeat"
    }
    fn scopes(&self) -> &[Scope] {
        &[Scope::Read]
    }
    fn schema(&self) -> &[ParamField] {
        &[ParamField {
            name: "agent_id",
            param_type: ParamType::String,
        }]
    }
    async fn handle(&self, params: Value, _ctx: &MethodContext) -> Result<Value> {
        let agent_id = str_param(&params, "agent_id")?;
        Ok(json!({"agent_id": agent_id, "last": self.0.heartbeat.last(&agent_id).await}))
    }
}

/// `wake`: force a heartbeat probe right now, tagged
/// `triggered_by: wake`. Only meaningful for agents whose heartbeat rides
/// a cron job (interval >= 60s); a sub-minute timer-driven heartbeat has
/// no addressable job to force, so this reports `conflict` for those —
/// the caller's timer will fire again within the minute regardless.
pub struct WakeMethod(pub Arc<GatewayState>);

#[async_trait]
impl Method for WakeMethod {
    fn name(&self) -> &str {
        "wake"
    }
    fn scopes(&self) -> &[Scope] {
        &[Scope::Invoke]
    }
    fn schema(&self) -> &[ParamField] {
        &[ParamField {
            name: "agent_id",
            param_type: ParamType::String,
        }]
    }
    async fn handle(&self, params: Value, _ctx: &MethodContext) -> Result<Value> {
        let agent_id = str_param(&params, "agent_id")?;
        let job_name = format!("heartbeat-{agent_id}");
        let job = self
            .0
            .cron
            .list()
            .await
            .into_iter()
            .find(|j| j.name == job_name)
            .ok_or_else(|| FabricError::Conflict(format!("agent {agent_id} has no cron-backed heartbeat to wake")))?;
        let run = self.0.cron.execute_job(job, TriggeredBy::Wake).await;
        Ok(json!(run))
    }
}

pub struct ExecApprovalRequestMethod(pub Arc<GatewayState>);

#[async_trait]
impl Method for ExecApprovalRequestMethod {
    fn name(&self) -> &str {
        "exec.approval.request"
    }
    fn scopes(&self) -> &[Scope] {
        &[Scope::Approvals]
    }
    fn schema(&self) -> &[ParamField] {
        &[
            ParamField {
                name: "session_key",
                param_type: ParamType::String,
            },
            ParamField {
                name: "peer_id",
                param_type: ParamType::String,
            },
        ]
    }
    async fn handle(&self, params: Value, _ctx: &MethodContext) -> Result<Value> {
        let approval_id = crate::clock::new_id("appr");
        let pending = json!({
            "approval_id": approval_id,
            "session_key": str_param(&params, "session_key")?,
            "peer_id": str_param(&params, "peer_id")?,
            "thread_id": opt_str(&params, "thread_id"),
            "summary": opt_str(&params, "summary"),
        });
        self.0
            .bus
            .broadcast("exec_approvals", Event::new("approval_requested", json!({"pending": pending})))
            .await;
        Ok(json!({"approval_id": approval_id}))
    }
}

pub struct ExecApprovalResolveMethod(pub Arc<GatewayState>);

#[async_trait]
impl Method for ExecApprovalResolveMethod {
    fn name(&self) -> &str {
        "exec.approval.resolve"
    }
    fn scopes(&self) -> &[Scope] {
        &[Scope::Approvals]
    }
    fn schema(&self) -> &[ParamField] {
        &[
            ParamField {
                name: "approval_id",
                param_type: ParamType::String,
            },
            ParamField {
                name: "decision",
                param_type: ParamType::String,
            },
        ]
    }
    async fn handle(&self, params: Value, _ctx: &MethodContext) -> Result<Value> {
        let approval_id = str_param(&params, "approval_id")?;
        let decision = str_param(&params, "decision")?;
        if serde_json::from_value::<crate::gateway::approvals::ApprovalDecision>(json!(decision)).is_err() {
            return Err(FabricError::InvalidParams(format!("unrecognized decision `{decision}`")));
        }
        self.0
            .bus
            .broadcast(
                "exec_approvals",
                Event::new("approval_resolved", json!({"approval_id": approval_id, "decision": decision})),
            )
            .await;
        Ok(json!({"approval_id": approval_id, "decision": decision}))
    }
}

/// Register every mandatory §6 method family against `state`.
pub fn register_default_methods(registry: &mut MethodRegistry, state: Arc<GatewayState>) {
    registry.register(Box::new(HealthMethod));
    registry.register(Box::new(ConnectMethod));
    registry.register(Box::new(SessionsListMethod(state.clone())));
    registry.register(Box::new(SessionsPatchMethod(state.clone())));
    registry.register(Box::new(SessionsResetMethod(state.clone())));
    registry.register(Box::new(SessionsDeleteMethod(state.clone())));
    registry.register(Box::new(ChatSendMethod(state.clone())));
    registry.register(Box::new(ChatAbortMethod(state.clone())));
    registry.register(Box::new(ChatHistoryMethod(state.clone())));
    registry.register(Box::new(AgentSubmitMethod(state.clone())));
    registry.register(Box::new(AgentWaitMethod(state.clone())));
    registry.register(Box::new(CronListMethod(state.clone())));
    registry.register(Box::new(CronAddMethod(state.clone())));
    registry.register(Box::new(CronUpdateMethod(state.clone())));
    registry.register(Box::new(CronRemoveMethod(state.clone())));
    registry.register(Box::new(CronRunMethod(state.clone())));
    registry.register(Box::new(CronRunsMethod(state.clone())));
    registry.register(Box::new(CronStatusMethod(state.clone())));
    registry.register(Box::new(SetHeartbeatsMethod(state.clone())));
    registry.register(Box::new(LastHeartbeatMethod(state.clone())));
    registry.register(Box::new(WakeMethod(state.clone())));
    registry.register(Box::new(ExecApprovalRequestMethod(state.clone())));
    registry.register(Box::new(ExecApprovalResolveMethod(state)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cron::CronStore;
    use crate::router::EchoRouter;
    use std::collections::HashSet;

    fn ctx() -> MethodContext {
        MethodContext {
            conn_id: "c1".into(),
            scopes: HashSet::from([Scope::Read, Scope::Write, Scope::Admin, Scope::Invoke, Scope::Approvals]),
            client_id: None,
        }
    }

    fn state() -> Arc<GatewayState> {
        let bus = Arc::new(crate::bus::Bus::new());
        let dir = tempfile::tempdir().unwrap();
        let store = crate::store::Store::new(dir.path().to_path_buf());
        std::mem::forget(dir);
        let cron_store = CronStore::new(store.clone());
        let router: Arc<dyn crate::router::Router> = Arc::new(EchoRouter::new(bus.clone()));
        let cron = Arc::new(crate::cron::CronManager::new(cron_store, bus.clone(), router.clone()));
        let heartbeat = Arc::new(crate::heartbeat::HeartbeatManager::new(
            store.clone(),
            bus.clone(),
            cron.clone(),
            router.clone(),
        ));
        let waiter = Arc::new(crate::gateway::waiter::RunWaiter::new(bus.clone()));
        let workspace = std::env::temp_dir();
        Arc::new(GatewayState::new(bus, store, cron, heartbeat, router, waiter, &workspace))
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let m = HealthMethod;
        let v = m.handle(json!({}), &ctx()).await.unwrap();
        assert_eq!(v["status"], "ok");
    }

    #[tokio::test]
    async fn cron_add_then_list_round_trips() {
        let st = state();
        let add = CronAddMethod(st.clone());
        let v = add
            .handle(
                json!({"name": "n", "schedule": "*/5 * * * *", "agent_id": "a", "session_key": "agent:a:main", "prompt": "hi"}),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(v["name"], "n");

        let list = CronListMethod(st);
        let v = list.handle(json!({}), &ctx()).await.unwrap();
        assert_eq!(v["jobs"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn chat_send_returns_echoed_answer() {
        let st = state();
        let m = ChatSendMethod(st);
        let v = m
            .handle(json!({"session_key": "agent:a:main", "text": "hello"}), &ctx())
            .await
            .unwrap();
        assert_eq!(v["ok"], true);
        assert_eq!(v["answer"], "hello");
    }

    #[tokio::test]
    async fn wake_without_a_heartbeat_job_is_conflict() {
        let st = state();
        let m = WakeMethod(st);
        let err = m.handle(json!({"agent_id": "ghost"}), &ctx()).await.unwrap_err();
        assert_eq!(err.code(), "conflict");
    }

    #[tokio::test]
    async fn exec_approval_resolve_rejects_unknown_decision() {
        let st = state();
        let m = ExecApprovalResolveMethod(st);
        let err = m
            .handle(json!({"approval_id": "ap1", "decision": "maybe"}), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_params");
    }
}
