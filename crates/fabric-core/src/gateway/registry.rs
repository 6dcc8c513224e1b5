//! Method Registry (component N, §4.14): name/scope/schema-checked
//! dispatch for every control-plane method the gateway exposes.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{FabricError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Read,
    Write,
    Admin,
    Approvals,
    Pairing,
    Invoke,
    Event,
    Control,
}

/// The JSON Schema-ish primitive types a method's params can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Boolean,
    Mapping,
    List,
    Any,
}

impl ParamType {
    fn matches(self, v: &Value) -> bool {
        match self {
            ParamType::String => v.is_string(),
            ParamType::Integer => v.is_i64() || v.is_u64(),
            ParamType::Boolean => v.is_boolean(),
            ParamType::Mapping => v.is_object(),
            ParamType::List => v.is_array(),
            ParamType::Any => true,
        }
    }
}

/// One required field in a method's param schema.
pub struct ParamField {
    pub name: &'static str,
    pub param_type: ParamType,
}

/// Execution context handed to a method: the calling connection's granted
/// scopes, plus whatever the connection/session layer wants to expose.
pub struct MethodContext {
    pub conn_id: String,
    pub scopes: HashSet<Scope>,
    pub client_id: Option<String>,
}

#[async_trait]
pub trait Method: Send + Sync {
    fn name(&self) -> &str;
    fn scopes(&self) -> &[Scope];
    /// Required parameter fields; validated before `handle` is called.
    fn schema(&self) -> &[ParamField] {
        &[]
    }
    async fn handle(&self, params: Value, ctx: &MethodContext) -> Result<Value>;
}

fn validate_schema(schema: &[ParamField], params: &Value) -> Result<()> {
    for field in schema {
        let value = params.get(field.name);
        match value {
            None => {
                return Err(FabricError::InvalidParams(format!(
                    "missing required field `{}`",
                    field.name
                )))
            }
            Some(v) if !field.param_type.matches(v) => {
                return Err(FabricError::InvalidParams(format!(
                    "field `{}` has the wrong type",
                    field.name
                )))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Name-indexed registry of [`Method`] implementations. Capability-gated
/// groups (TTS, voicewake, device-pairing, wizard, updates) are simply
/// never registered when their feature is disabled in configuration —
/// dispatch then reports `method_not_found`, same as any unknown method.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Box<dyn Method>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method: Box<dyn Method>) {
        self.methods.insert(method.name().to_string(), method);
    }

    pub fn has(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Every registered method name, for `hello_ok`'s `features.methods`.
    pub fn names(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }

    /// §4.14's dispatch path: lookup, schema validation, scope
    /// authorization, then invoke.
    pub async fn dispatch(&self, name: &str, params: Value, ctx: &MethodContext) -> Result<Value> {
        let method = self
            .methods
            .get(name)
            .ok_or_else(|| FabricError::MethodNotFound(name.to_string()))?;

        validate_schema(method.schema(), &params)?;

        let required: HashSet<Scope> = method.scopes().iter().copied().collect();
        if !required.is_empty() && required.is_disjoint(&ctx.scopes) {
            return Err(FabricError::Forbidden(format!(
                "method `{name}` requires one of {required:?}"
            )));
        }

        method.handle(params, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoMethod;

    #[async_trait]
    impl Method for EchoMethod {
        fn name(&self) -> &str {
            "echo"
        }
        fn scopes(&self) -> &[Scope] {
            &[Scope::Read]
        }
        fn schema(&self) -> &[ParamField] {
            &[ParamField {
                name: "text",
                param_type: ParamType::String,
            }]
        }
        async fn handle(&self, params: Value, _ctx: &MethodContext) -> Result<Value> {
            Ok(params)
        }
    }

    fn ctx(scopes: &[Scope]) -> MethodContext {
        MethodContext {
            conn_id: "c1".into(),
            scopes: scopes.iter().copied().collect(),
            client_id: None,
        }
    }

    #[tokio::test]
    async fn dispatch_unknown_method_is_method_not_found() {
        let reg = MethodRegistry::new();
        let err = reg.dispatch("nope", json!({}), &ctx(&[Scope::Read])).await.unwrap_err();
        assert_eq!(err.code(), "method_not_found");
    }

    #[tokio::test]
    async fn dispatch_missing_required_field_is_invalid_params() {
        let mut reg = MethodRegistry::new();
        reg.register(Box::new(EchoMethod));
        let err = reg
            .dispatch("echo", json!({}), &ctx(&[Scope::Read]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_params");
    }

    #[tokio::test]
    async fn dispatch_without_required_scope_is_forbidden() {
        let mut reg = MethodRegistry::new();
        reg.register(Box::new(EchoMethod));
        let err = reg
            .dispatch("echo", json!({"text": "hi"}), &ctx(&[Scope::Write]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }

    #[tokio::test]
    async fn dispatch_succeeds_with_valid_params_and_scope() {
        let mut reg = MethodRegistry::new();
        reg.register(Box::new(EchoMethod));
        let result = reg
            .dispatch("echo", json!({"text": "hi"}), &ctx(&[Scope::Read]))
            .await
            .unwrap();
        assert_eq!(result["text"], "hi");
    }
}
