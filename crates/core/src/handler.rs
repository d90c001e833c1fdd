//! Declarative event-handler descriptors.
//!
//! A handler names exactly one main action plus bounded lists of
//! sub-handlers that run before it, after it succeeds, after it fails, and
//! unconditionally at the end.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::datasource::HttpMethod;
use crate::types::DataSourceId;

/// Closed set of action kinds a handler can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    #[serde(alias = "navigate")]
    Navigation,
    OpenModal,
    CloseModal,
    UpdateState,
    RunScript,
    ApiCall,
    CrudCreate,
    CrudRead,
    CrudUpdate,
    CrudDelete,
    AuditLog,
    AiGenerate,
    Graphql,
    GraphqlMutation,
    GraphqlSubscription,
    ExportCsv,
    ExportJson,
    VoiceCommand,
    InitiateCall,
    WalletConnect,
    WalletSign,
    Toast,
}

impl ActionKind {
    /// Every action kind, in declaration order.
    pub const ALL: [ActionKind; 22] = [
        Self::Navigation,
        Self::OpenModal,
        Self::CloseModal,
        Self::UpdateState,
        Self::RunScript,
        Self::ApiCall,
        Self::CrudCreate,
        Self::CrudRead,
        Self::CrudUpdate,
        Self::CrudDelete,
        Self::AuditLog,
        Self::AiGenerate,
        Self::Graphql,
        Self::GraphqlMutation,
        Self::GraphqlSubscription,
        Self::ExportCsv,
        Self::ExportJson,
        Self::VoiceCommand,
        Self::InitiateCall,
        Self::WalletConnect,
        Self::WalletSign,
        Self::Toast,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::OpenModal => "open_modal",
            Self::CloseModal => "close_modal",
            Self::UpdateState => "update_state",
            Self::RunScript => "run_script",
            Self::ApiCall => "api_call",
            Self::CrudCreate => "crud_create",
            Self::CrudRead => "crud_read",
            Self::CrudUpdate => "crud_update",
            Self::CrudDelete => "crud_delete",
            Self::AuditLog => "audit_log",
            Self::AiGenerate => "ai_generate",
            Self::Graphql => "graphql",
            Self::GraphqlMutation => "graphql_mutation",
            Self::GraphqlSubscription => "graphql_subscription",
            Self::ExportCsv => "export_csv",
            Self::ExportJson => "export_json",
            Self::VoiceCommand => "voice_command",
            Self::InitiateCall => "initiate_call",
            Self::WalletConnect => "wallet_connect",
            Self::WalletSign => "wallet_sign",
            Self::Toast => "toast",
        }
    }

    /// Parse the snake_case name used in descriptors.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .or_else(|| (name == "navigate").then_some(Self::Navigation))
    }

    /// Network-bearing kinds need a resolvable `dataSourceId`.
    pub fn requires_data_source(self) -> bool {
        matches!(
            self,
            Self::ApiCall
                | Self::CrudCreate
                | Self::CrudRead
                | Self::CrudUpdate
                | Self::CrudDelete
                | Self::AiGenerate
                | Self::Graphql
                | Self::GraphqlMutation
                | Self::GraphqlSubscription
        )
    }

    pub fn is_crud(self) -> bool {
        matches!(
            self,
            Self::CrudCreate | Self::CrudRead | Self::CrudUpdate | Self::CrudDelete
        )
    }

    /// Method implied by a CRUD kind when the data source omits one.
    pub fn crud_method(self) -> Option<HttpMethod> {
        match self {
            Self::CrudCreate => Some(HttpMethod::Post),
            Self::CrudRead => Some(HttpMethod::Get),
            Self::CrudUpdate => Some(HttpMethod::Put),
            Self::CrudDelete => Some(HttpMethod::Delete),
            _ => None,
        }
    }

    /// Confirmation shown after a successful mutating CRUD call when the
    /// handler supplies no message of its own.
    pub fn default_success_message(self) -> Option<&'static str> {
        match self {
            Self::CrudCreate => Some("Created successfully"),
            Self::CrudUpdate => Some("Updated successfully"),
            Self::CrudDelete => Some("Deleted successfully"),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single state patch. `value` may contain binding expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatePatch {
    pub path: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl StatePatch {
    pub fn new(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigateSpec {
    pub href: String,
    #[serde(default)]
    pub replace: bool,
}

/// Side effects applied after the success or error branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    #[serde(default)]
    pub navigate: Option<NavigateSpec>,
    #[serde(default)]
    pub open_modal: Option<String>,
    #[serde(default)]
    pub close_modal: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub set_state: Vec<StatePatch>,
}

/// Expected shape of the response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    #[default]
    Json,
    Text,
    Blob,
}

/// Post-processing of a successful result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultMapping {
    /// Script evaluated by the host script engine with the result as input.
    Script(String),
    /// Declarative projection: output key -> dotted path inside the result.
    Paths(BTreeMap<String, String>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseHandling {
    #[serde(default)]
    pub response_type: Option<ResponseType>,
    /// Where the (mapped) result is written. May contain bindings and an
    /// `{id}` placeholder.
    #[serde(default)]
    pub state_path: Option<String>,
    #[serde(default)]
    pub result_mapping: Option<ResultMapping>,
}

/// Declarative event-handler descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventHandler {
    pub action: ActionKind,
    #[serde(default)]
    pub data_source_id: Option<DataSourceId>,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub before: Vec<EventHandler>,
    #[serde(default, alias = "onSuccess")]
    pub success: Vec<EventHandler>,
    #[serde(default, alias = "onError")]
    pub error: Vec<EventHandler>,
    #[serde(default)]
    pub finally: Vec<EventHandler>,
    #[serde(default)]
    pub success_transition: Option<Transition>,
    #[serde(default)]
    pub error_transition: Option<Transition>,
    #[serde(default)]
    pub response: Option<ResponseHandling>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub optimistic: Vec<StatePatch>,
    #[serde(default)]
    pub success_message: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub is_login: bool,
    #[serde(default)]
    pub is_logout: bool,
}

impl EventHandler {
    pub fn new(action: ActionKind) -> Self {
        Self {
            action,
            data_source_id: None,
            params: serde_json::Map::new(),
            before: Vec::new(),
            success: Vec::new(),
            error: Vec::new(),
            finally: Vec::new(),
            success_transition: None,
            error_transition: None,
            response: None,
            optimistic: Vec::new(),
            success_message: None,
            error_message: None,
            is_login: false,
            is_logout: false,
        }
    }

    #[must_use]
    pub fn with_data_source(mut self, id: impl Into<DataSourceId>) -> Self {
        self.data_source_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn on_success(mut self, handler: EventHandler) -> Self {
        self.success.push(handler);
        self
    }

    #[must_use]
    pub fn on_error(mut self, handler: EventHandler) -> Self {
        self.error.push(handler);
        self
    }

    #[must_use]
    pub fn before(mut self, handler: EventHandler) -> Self {
        self.before.push(handler);
        self
    }

    #[must_use]
    pub fn finally(mut self, handler: EventHandler) -> Self {
        self.finally.push(handler);
        self
    }

    pub fn param(&self, key: &str) -> Option<&serde_json::Value> {
        self.params.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(serde_json::Value::as_str)
    }

    /// Depth of the deepest sub-handler chain, counting this handler as one.
    pub fn depth(&self) -> usize {
        1 + self
            .before
            .iter()
            .chain(&self.success)
            .chain(&self.error)
            .chain(&self.finally)
            .map(EventHandler::depth)
            .max()
            .unwrap_or(0)
    }
}

/// Accept either a single object or a list of objects.
fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(item)) => vec![item],
        Some(OneOrMany::Many(items)) => items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_kinds_round_trip_through_names() {
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::parse(kind.as_str()), Some(kind));
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, serde_json::Value::String(kind.as_str().to_owned()));
        }
        assert_eq!(ActionKind::parse("navigate"), Some(ActionKind::Navigation));
        assert_eq!(ActionKind::parse("teleport"), None);
    }

    #[test]
    fn crud_methods() {
        assert_eq!(ActionKind::CrudCreate.crud_method(), Some(HttpMethod::Post));
        assert_eq!(ActionKind::CrudRead.crud_method(), Some(HttpMethod::Get));
        assert_eq!(ActionKind::CrudUpdate.crud_method(), Some(HttpMethod::Put));
        assert_eq!(ActionKind::CrudDelete.crud_method(), Some(HttpMethod::Delete));
        assert_eq!(ActionKind::ApiCall.crud_method(), None);
        assert_eq!(ActionKind::CrudRead.default_success_message(), None);
    }

    #[test]
    fn deserializes_nested_handler() {
        let handler: EventHandler = serde_json::from_value(serde_json::json!({
            "action": "crud_create",
            "dataSourceId": "todos",
            "params": {"body": {"title": "{{draft}}"}},
            "optimistic": {"path": "saving", "value": true},
            "onSuccess": [{"action": "toast", "params": {"message": "ok"}}],
            "onError": [{
                "action": "update_state",
                "params": {"path": "err", "value": "{{error.message}}"}
            }],
            "finally": [{"action": "update_state", "params": {"path": "saving", "value": false}}],
            "successTransition": {
                "navigate": {"href": "/todos"},
                "setState": {"path": "draft", "value": ""}
            }
        }))
        .unwrap();
        assert_eq!(handler.action, ActionKind::CrudCreate);
        assert_eq!(handler.optimistic.len(), 1);
        assert_eq!(handler.success.len(), 1);
        assert_eq!(handler.error.len(), 1);
        assert_eq!(handler.finally.len(), 1);
        let transition = handler.success_transition.as_ref().unwrap();
        assert_eq!(transition.set_state.len(), 1);
        assert_eq!(handler.depth(), 2);
    }

    #[test]
    fn result_mapping_forms() {
        let script: ResultMapping =
            serde_json::from_value(serde_json::json!("result.items")).unwrap();
        assert!(matches!(script, ResultMapping::Script(_)));
        let paths: ResultMapping =
            serde_json::from_value(serde_json::json!({"name": "data.user.name"})).unwrap();
        assert!(matches!(paths, ResultMapping::Paths(_)));
    }
}
