//! Wire types shared by every [`super::LlmProvider`] implementation: chat
//! messages, tool definitions/calls, and usage accounting. Modeled on the
//! OpenAI chat-completions schema since that's what `openai.rs` speaks
//! directly and what every other provider in [`PROVIDER_URLS`](super::openai)
//! is compatible with.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `content` is `Value` rather than `String` because the OpenAI-compatible
/// wire format allows either a plain string or a multi-part array (e.g. for
/// vision inputs). Every constructor here only ever produces the plain
/// string form; [`ChatMessage::content_as_str`] is the inverse for callers
/// that only care about that common case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallMessage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".into(),
            content: Some(Value::String(content.to_string())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".into(),
            content: Some(Value::String(content.to_string())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: "assistant".into(),
            content: Some(Value::String(content.to_string())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant_with_tool_calls(
        content: Option<&str>,
        tool_calls: Vec<ToolCallMessage>,
    ) -> Self {
        Self {
            role: "assistant".into(),
            content: content.map(|s| Value::String(s.to_string())),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool_result(tool_call_id: &str, tool_name: &str, result: &str) -> Self {
        Self {
            role: "tool".into(),
            content: Some(Value::String(result.to_string())),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.to_string()),
            name: Some(tool_name.to_string()),
        }
    }

    /// The content as a plain string, when it's the common single-string
    /// form (as every constructor above produces).
    pub fn content_as_str(&self) -> Option<&str> {
        self.content.as_ref().and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// A tool call as parsed out of a provider response, arguments already
/// decoded from their JSON-string wire form.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub def_type: String,
    pub function: ToolFunctionDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: String,
    pub usage: Usage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_sets_role_and_id() {
        let m = ChatMessage::tool_result("call_1", "read_file", "contents");
        assert_eq!(m.role, "tool");
        assert_eq!(m.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(m.name.as_deref(), Some("read_file"));
    }

    #[test]
    fn assistant_with_tool_calls_keeps_content_optional() {
        let m = ChatMessage::assistant_with_tool_calls(None, vec![]);
        assert!(m.content.is_none());
        assert!(m.tool_calls.is_some());
    }
}
