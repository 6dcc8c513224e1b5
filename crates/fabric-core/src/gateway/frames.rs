//! Protocol Frames (component O, §4.15): the four wire shapes every
//! control-plane WebSocket connection speaks, plus the error taxonomy
//! they carry.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FabricError;

/// A client→server request frame.
#[derive(Debug, Clone, Deserialize)]
pub struct ReqFrame {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// The error payload carried by a failed `res` frame.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<&FabricError> for ErrorPayload {
    fn from(e: &FabricError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
            details: None,
        }
    }
}

/// A server→client response frame, answering exactly one `req` by id.
#[derive(Debug, Clone, Serialize)]
pub struct ResFrame {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl ResFrame {
    pub fn ok(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: &FabricError) -> Self {
        Self {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error.into()),
        }
    }
}

/// Tracks the last-stamped `stateVersion` per category — bumped by the
/// EventBridge before fan-out, per §4.16.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StateVersion {
    pub presence: u64,
    pub health: u64,
    pub cron: u64,
}

/// A server→client unsolicited event frame.
#[derive(Debug, Clone, Serialize)]
pub struct EventFrame {
    pub event: String,
    pub seq: u64,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_version: Option<StateVersion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub version: String,
    pub conn_id: String,
    pub host: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Features {
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub presence: Value,
    pub health: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Policy {
    pub max_payload: usize,
    pub max_buffered_bytes: usize,
    pub tick_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Auth {
    pub role: String,
    pub scopes: Vec<String>,
}

/// The one-time handshake response, replacing the normal `res` frame for
/// the connection's first `connect` call.
#[derive(Debug, Clone, Serialize)]
pub struct HelloOk {
    pub protocol: u32,
    pub server: ServerInfo,
    pub features: Features,
    pub snapshot: Snapshot,
    pub policy: Policy,
    pub auth: Auth,
}

pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_MAX_PAYLOAD: usize = 1 << 20;
pub const DEFAULT_MAX_BUFFERED_BYTES: usize = 4 << 20;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 15_000;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn res_frame_err_carries_the_error_code() {
        let e = FabricError::NotFound("session".into());
        let frame = ResFrame::err("req1", &e);
        assert!(!frame.ok);
        assert_eq!(frame.error.unwrap().code, "not_found");
    }

    #[test]
    fn res_frame_ok_serializes_without_error_field() {
        let frame = ResFrame::ok("req2", json!({"x": 1}));
        let v = serde_json::to_value(&frame).unwrap();
        assert!(v.get("error").is_none());
        assert_eq!(v["payload"]["x"], 1);
    }
}
