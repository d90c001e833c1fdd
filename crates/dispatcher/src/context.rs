use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use weft_core::{ActionError, DataSource, DataSourceId, EventHandler, InvocationId};

use crate::dispatcher::ActionDispatcher;

/// Per-invocation facts shared by every handler in one dispatch.
#[derive(Debug)]
pub(crate) struct Invocation<'a> {
    pub id: InvocationId,
    pub cancel: CancellationToken,
    /// Screen-local data sources, consulted before the global registry.
    pub local: &'a [DataSource],
    pub requires_auth: bool,
}

/// Everything a strategy sees while executing one handler's main action.
///
/// Bindings are resolved against a fresh state snapshot on every call, so
/// a strategy never acts on state captured before an await point.
pub struct ActionContext<'a> {
    pub(crate) dispatcher: &'a ActionDispatcher,
    pub(crate) invocation: &'a Invocation<'a>,
    pub(crate) handler: &'a EventHandler,
    /// Contextual values (`event`, `result`, `error`) layered over state.
    pub(crate) context: &'a Map<String, Value>,
}

impl<'a> ActionContext<'a> {
    pub fn dispatcher(&self) -> &'a ActionDispatcher {
        self.dispatcher
    }

    pub fn handler(&self) -> &'a EventHandler {
        self.handler
    }

    pub fn invocation_id(&self) -> &InvocationId {
        &self.invocation.id
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.invocation.cancel
    }

    pub fn local_sources(&self) -> &'a [DataSource] {
        self.invocation.local
    }

    /// Current state with the contextual values layered on top.
    pub fn scope(&self) -> Value {
        self.dispatcher.scope(self.context)
    }

    /// Resolve `expr` against the current scope.
    pub fn resolve(&self, expr: &Value) -> Value {
        self.dispatcher.resolve(expr, &self.scope())
    }

    /// Resolved parameter.
    pub fn param(&self, key: &str) -> Option<Value> {
        self.handler.param(key).map(|v| self.resolve(v))
    }

    /// First present parameter among `keys`, resolved to a string.
    pub fn param_str(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .find_map(|k| self.param(k))
            .and_then(|v| match v {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
    }

    /// Like [`param_str`](Self::param_str) but missing is a validation error.
    pub fn require_str(&self, keys: &[&str], what: &str) -> Result<String, ActionError> {
        self.param_str(keys)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ActionError::Validation(format!("{} requires {what}", self.handler.action))
            })
    }

    /// All parameters resolved as one object.
    pub fn params(&self) -> Value {
        self.resolve(&Value::Object(self.handler.params.clone()))
    }

    /// The handler's data source id. Network-bearing kinds fail here,
    /// before any request is built, when it is absent.
    pub fn data_source_id(&self) -> Result<&'a DataSourceId, ActionError> {
        self.handler.data_source_id.as_ref().ok_or_else(|| {
            ActionError::Validation(format!("{} requires a dataSourceId", self.handler.action))
        })
    }
}
