use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use weft_core::{ActionError, ToastVariant};

use crate::context::ActionContext;
use crate::strategy::ActionStrategy;

/// `navigation`: `{href, replace?}`.
#[derive(Debug, Clone, Copy)]
pub struct Navigate;

#[async_trait]
impl ActionStrategy for Navigate {
    async fn execute(&self, cx: &ActionContext<'_>) -> Result<Value, ActionError> {
        let href = cx.require_str(&["href", "path", "url", "to"], "an href")?;
        let replace = cx.param("replace").and_then(|v| v.as_bool()).unwrap_or(false);
        cx.dispatcher().runtime.navigate(&href, replace);
        Ok(json!({"href": href, "replace": replace}))
    }
}

/// `open_modal` / `close_modal`: `{modalId}`.
#[derive(Debug, Clone, Copy)]
pub struct ToggleModal {
    pub open: bool,
}

#[async_trait]
impl ActionStrategy for ToggleModal {
    async fn execute(&self, cx: &ActionContext<'_>) -> Result<Value, ActionError> {
        let id = cx.require_str(&["modalId", "modal", "id"], "a modal id")?;
        let runtime = &cx.dispatcher().runtime;
        if self.open {
            runtime.open_modal(&id);
        } else {
            runtime.close_modal(&id);
        }
        Ok(json!({"modalId": id}))
    }
}

/// `toast`: `{message, variant?}`.
#[derive(Debug, Clone, Copy)]
pub struct ShowToast;

#[async_trait]
impl ActionStrategy for ShowToast {
    async fn execute(&self, cx: &ActionContext<'_>) -> Result<Value, ActionError> {
        let message = cx.require_str(&["message", "text"], "a message")?;
        let variant = cx
            .param_str(&["variant", "type"])
            .map_or(ToastVariant::Info, |v| ToastVariant::parse(&v));
        cx.dispatcher().runtime.toast(&message, variant);
        Ok(Value::String(message))
    }
}

/// `update_state`: `{path, value}`. The value is resolved against current
/// state; objects and arrays are resolved property by property.
#[derive(Debug, Clone, Copy)]
pub struct UpdateState;

#[async_trait]
impl ActionStrategy for UpdateState {
    async fn execute(&self, cx: &ActionContext<'_>) -> Result<Value, ActionError> {
        let path = cx.require_str(&["path", "statePath", "key"], "a state path")?;
        let value = cx.param("value").unwrap_or(Value::Null);
        debug!(path = %path, "updating state");
        cx.dispatcher().state.set_state(&path, value.clone());
        Ok(value)
    }
}

/// `run_script`: `{script, path?}` evaluated by the host script engine
/// with the current scope.
#[derive(Debug, Clone, Copy)]
pub struct RunScript;

#[async_trait]
impl ActionStrategy for RunScript {
    async fn execute(&self, cx: &ActionContext<'_>) -> Result<Value, ActionError> {
        let script = cx
            .handler()
            .param_str("script")
            .or_else(|| cx.handler().param_str("code"))
            .ok_or_else(|| ActionError::Validation("run_script requires a script".into()))?;
        let value = cx.dispatcher().scripts.evaluate(script, &cx.scope())?;
        if let Some(path) = cx.param_str(&["path", "statePath"]) {
            cx.dispatcher().state.set_state(&path, value.clone());
        }
        Ok(value)
    }
}
