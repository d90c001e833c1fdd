//! Contracts for the collaborators the action runtime consumes but does not
//! own: binding evaluation, translation, the app-state container, telemetry,
//! host UI callbacks, token access, script evaluation and device features.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ActionError;
use crate::handler::ActionKind;

/// Translation lookup used by `{{t:key}}` bindings.
pub trait Translator: Send + Sync {
    fn translate(&self, key: &str) -> Option<String>;
}

/// Translator that knows no keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTranslator;

impl Translator for IdentityTranslator {
    fn translate(&self, _key: &str) -> Option<String> {
        None
    }
}

/// Evaluates templated values against a scope.
///
/// Implementations must never fail: an expression that references an absent
/// path is returned untouched.
pub trait BindingResolver: Send + Sync {
    fn resolve(&self, expr: &Value, scope: &Value, translate: &dyn Translator) -> Value;
}

/// The externally owned application state.
///
/// The runtime only reads snapshots and requests patches. It never keeps a
/// private copy across an await point.
pub trait StateContainer: Send + Sync {
    /// Current state as a JSON object.
    fn snapshot(&self) -> Value;

    fn get(&self, path: &str) -> Option<Value> {
        crate::path::get(&self.snapshot(), path).cloned()
    }

    fn set_state(&self, path: &str, value: Value);
}

/// A fire-and-forget analytics event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub name: String,
    #[serde(default)]
    pub properties: Value,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryEvent {
    pub fn new(name: impl Into<String>, properties: Value) -> Self {
        Self {
            name: name.into(),
            properties,
            timestamp: Utc::now(),
        }
    }
}

/// Analytics sink. `track` must not block and must not fail the caller.
pub trait Telemetry: Send + Sync {
    fn track(&self, event: TelemetryEvent);
}

/// Telemetry sink that forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn track(&self, event: TelemetryEvent) {
        tracing::info!(
            target: "weft::telemetry",
            event = %event.name,
            properties = %event.properties,
            timestamp = %event.timestamp.to_rfc3339(),
            "telemetry event"
        );
    }
}

/// Visual flavour of a toast notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastVariant {
    Info,
    Success,
    Warning,
    Error,
}

impl ToastVariant {
    pub fn parse(name: &str) -> Self {
        match name {
            "success" => Self::Success,
            "warning" | "warn" => Self::Warning,
            "error" | "danger" => Self::Error,
            _ => Self::Info,
        }
    }
}

/// Host UI side effects.
pub trait RuntimeCallbacks: Send + Sync {
    fn toast(&self, message: &str, variant: ToastVariant);

    fn navigate(&self, href: &str, replace: bool);

    fn open_modal(&self, id: &str);

    fn close_modal(&self, id: &str);

    /// Hand a generated file to the host.
    fn download(&self, filename: &str, content_type: &str, data: &[u8]) -> Result<(), ActionError> {
        let _ = (content_type, data);
        Err(ActionError::Unsupported(format!(
            "host cannot download {filename}"
        )))
    }
}

/// Bearer-token access for request resolution and 401 recovery.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// The live access token, if any.
    fn access_token(&self) -> Option<String>;

    /// Whether a refresh token is available.
    fn can_refresh(&self) -> bool;

    /// Exchange the refresh token and return the new access token.
    async fn refresh_token(&self) -> Result<String, ActionError>;
}

/// Evaluates result-mapping and `run_script` snippets.
pub trait ScriptEngine: Send + Sync {
    fn evaluate(&self, script: &str, scope: &Value) -> Result<Value, ActionError>;
}

/// Script engine that supports no scripts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoScriptEngine;

impl ScriptEngine for NoScriptEngine {
    fn evaluate(&self, _script: &str, _scope: &Value) -> Result<Value, ActionError> {
        Err(ActionError::Unsupported("no script engine configured".into()))
    }
}

/// Platform features such as voice input, calls and wallets.
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    async fn invoke(&self, kind: ActionKind, params: &Value) -> Result<Value, ActionError>;
}

/// Device bridge for hosts without device features.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedDevices;

#[async_trait]
impl DeviceBridge for UnsupportedDevices {
    async fn invoke(&self, kind: ActionKind, _params: &Value) -> Result<Value, ActionError> {
        Err(ActionError::Unsupported(format!(
            "{kind} is not available on this host"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toast_variant_parsing() {
        assert_eq!(ToastVariant::parse("success"), ToastVariant::Success);
        assert_eq!(ToastVariant::parse("danger"), ToastVariant::Error);
        assert_eq!(ToastVariant::parse("whatever"), ToastVariant::Info);
    }

    #[tokio::test]
    async fn unsupported_devices_reject() {
        let err = UnsupportedDevices
            .invoke(ActionKind::WalletSign, &Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED");
    }

    #[test]
    fn default_download_is_unsupported() {
        struct Quiet;
        impl RuntimeCallbacks for Quiet {
            fn toast(&self, _: &str, _: ToastVariant) {}
            fn navigate(&self, _: &str, _: bool) {}
            fn open_modal(&self, _: &str) {}
            fn close_modal(&self, _: &str) {}
        }
        assert!(Quiet.download("a.csv", "text/csv", b"x").is_err());
    }
}
