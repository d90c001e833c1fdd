use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::datasource::{BodyEncoding, CredentialsMode, HttpMethod};
use crate::handler::ResponseType;
use crate::types::{DataSourceId, EventId};

/// What an offline event replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineEventKind {
    /// A dispatcher action re-dispatched on replay.
    Action,
    /// A raw REST call.
    Rest,
    /// A GraphQL mutation.
    Graphql,
}

/// A pending mutating operation persisted while offline.
///
/// The event is a snapshot of the resolved request: `url` (without its query
/// string), `query_params`, body and headers are replayed as stored, so a
/// replay never depends on the dispatch-time payload or on the descriptor
/// still being registered. `session_auth` marks a request whose session
/// bearer token was stripped; replay attaches the live one.
///
/// `created_at` (epoch milliseconds, strictly increasing per queue) defines
/// replay order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineEvent {
    pub id: EventId,
    pub kind: OfflineEventKind,
    pub ds_id: DataSourceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<HttpMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<BodyEncoding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_params: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialsMode>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub session_auth: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<ResponseType>,
    #[serde(default)]
    pub created_at: i64,
}

impl OfflineEvent {
    /// Create an event with a fresh id. `created_at` is assigned when the
    /// event is enqueued.
    pub fn new(kind: OfflineEventKind, ds_id: impl Into<DataSourceId>) -> Self {
        Self {
            id: EventId::generate(),
            kind,
            ds_id: ds_id.into(),
            operation: None,
            query: None,
            method: None,
            url: None,
            variables: None,
            body: None,
            encoding: None,
            query_params: None,
            headers: None,
            credentials: None,
            session_auth: false,
            state_path: None,
            response_type: None,
            created_at: 0,
        }
    }

    #[must_use]
    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = Some(method);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }
}
