use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::types::DataSourceId;

/// Transport method of a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    /// GraphQL over POST (or a subscription over WebSocket).
    Graphql,
    /// Plain WebSocket stream.
    Websocket,
}

impl HttpMethod {
    /// Returns the method name as an uppercase string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Graphql => "GRAPHQL",
            Self::Websocket => "WEBSOCKET",
        }
    }

    /// Whether a request with this method changes server state and is
    /// therefore queued instead of failed when offline.
    pub fn is_mutating(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch | Self::Delete)
    }

    /// Whether the method carries a request body.
    pub fn has_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch | Self::Graphql)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication scheme declared on a data source or an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    Bearer,
    Basic,
    ApiKey,
    #[default]
    None,
}

/// Authentication descriptor. `value` may contain binding expressions.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthDescriptor {
    #[serde(rename = "type", default)]
    pub auth_type: AuthType,
    #[serde(default)]
    pub value: Option<String>,
    /// Header used for `api_key` auth. Defaults to `X-API-Key`.
    #[serde(default)]
    pub header: Option<String>,
}

impl AuthDescriptor {
    pub fn bearer(value: impl Into<String>) -> Self {
        Self {
            auth_type: AuthType::Bearer,
            value: Some(value.into()),
            header: None,
        }
    }

    pub fn is_none(&self) -> bool {
        self.auth_type == AuthType::None
    }
}

impl std::fmt::Debug for AuthDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthDescriptor")
            .field("auth_type", &self.auth_type)
            .field("value", &self.value.as_ref().map(|_| "[REDACTED]"))
            .field("header", &self.header)
            .finish()
    }
}

/// Cookie policy forwarded to the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialsMode {
    Include,
    #[default]
    SameOrigin,
    Omit,
}

/// How the body template is encoded on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncoding {
    #[default]
    Json,
    Form,
    Multipart,
    Raw,
}

/// GraphQL operation kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphqlOperation {
    #[default]
    Query,
    Mutation,
    Subscription,
}

/// WebSocket sub-protocol used for GraphQL subscriptions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubscriptionProtocol {
    /// Legacy `graphql-ws` sub-protocol (`start` / `data`).
    GraphqlWs,
    /// `graphql-transport-ws` (`subscribe` / `next`).
    #[default]
    GraphqlTransportWs,
    /// `subscriptions-transport-ws` (`start` / `data`), negotiated as
    /// `graphql-ws` on the wire.
    SubscriptionsTransportWs,
}

impl SubscriptionProtocol {
    /// Value of the `Sec-WebSocket-Protocol` header.
    pub fn header_value(self) -> &'static str {
        match self {
            Self::GraphqlTransportWs => "graphql-transport-ws",
            Self::GraphqlWs | Self::SubscriptionsTransportWs => "graphql-ws",
        }
    }

    /// Client message type that starts an operation.
    pub fn start_message(self) -> &'static str {
        match self {
            Self::GraphqlTransportWs => "subscribe",
            Self::GraphqlWs | Self::SubscriptionsTransportWs => "start",
        }
    }

    /// Server message type that carries a payload.
    pub fn data_message(self) -> &'static str {
        match self {
            Self::GraphqlTransportWs => "next",
            Self::GraphqlWs | Self::SubscriptionsTransportWs => "data",
        }
    }

    /// Client message type that stops an operation.
    pub fn stop_message(self) -> &'static str {
        match self {
            Self::GraphqlTransportWs => "complete",
            Self::GraphqlWs | Self::SubscriptionsTransportWs => "stop",
        }
    }
}

/// Declarative descriptor of a remote endpoint.
///
/// Every string field may contain binding expressions; they are resolved at
/// call time into a [`ResolvedRequest`](crate::request::ResolvedRequest) and
/// the descriptor itself is never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub id: DataSourceId,
    /// Human-readable name, also used to recognise login/logout endpoints.
    #[serde(default)]
    pub name: Option<String>,
    /// Explicit method. When absent the calling action decides.
    #[serde(default)]
    pub method: Option<HttpMethod>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default, alias = "url")]
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query_params: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub body_encoding: BodyEncoding,
    #[serde(default)]
    pub auth: Option<AuthDescriptor>,
    #[serde(default)]
    pub credentials: CredentialsMode,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub operation: Option<GraphqlOperation>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub variables: Option<serde_json::Value>,
    #[serde(default)]
    pub subscription_protocol: Option<SubscriptionProtocol>,
}

impl DataSource {
    /// Create a descriptor with only an id and a path.
    pub fn new(id: impl Into<DataSourceId>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            method: None,
            base_url: None,
            path: path.into(),
            headers: BTreeMap::new(),
            query_params: BTreeMap::new(),
            body: None,
            body_encoding: BodyEncoding::Json,
            auth: None,
            credentials: CredentialsMode::default(),
            retry: None,
            timeout_ms: None,
            operation: None,
            query: None,
            variables: None,
            subscription_protocol: None,
        }
    }

    #[must_use]
    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = Some(method);
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_auth(mut self, auth: AuthDescriptor) -> Self {
        self.auth = Some(auth);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Name used for login/logout detection: the explicit name, else the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_authored_descriptor() {
        let ds: DataSource = serde_json::from_value(serde_json::json!({
            "id": "users",
            "method": "POST",
            "baseUrl": "https://api.example.com",
            "url": "/users/{{userId}}",
            "headers": {"X-Tenant": "{{tenant}}"},
            "queryParams": {"page": 1},
            "auth": {"type": "bearer", "value": "{{auth.token}}"},
            "credentials": "include",
            "retry": {"attempts": 4, "delay": 200, "strategy": "jitter"}
        }))
        .unwrap();
        assert_eq!(ds.method, Some(HttpMethod::Post));
        assert_eq!(ds.path, "/users/{{userId}}");
        assert_eq!(ds.credentials, CredentialsMode::Include);
        assert_eq!(ds.auth.as_ref().unwrap().auth_type, AuthType::Bearer);
        assert_eq!(ds.retry.as_ref().unwrap().attempts, 4);
    }

    #[test]
    fn auth_debug_redacts_value() {
        let auth = AuthDescriptor::bearer("secret-token");
        let rendered = format!("{auth:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn subscription_protocol_message_names() {
        assert_eq!(SubscriptionProtocol::GraphqlTransportWs.start_message(), "subscribe");
        assert_eq!(SubscriptionProtocol::GraphqlTransportWs.data_message(), "next");
        assert_eq!(SubscriptionProtocol::GraphqlWs.start_message(), "start");
        assert_eq!(SubscriptionProtocol::SubscriptionsTransportWs.data_message(), "data");
        assert_eq!(
            SubscriptionProtocol::SubscriptionsTransportWs.header_value(),
            "graphql-ws"
        );
    }

    #[test]
    fn mutating_methods() {
        assert!(HttpMethod::Post.is_mutating());
        assert!(HttpMethod::Delete.is_mutating());
        assert!(!HttpMethod::Get.is_mutating());
        assert!(!HttpMethod::Graphql.is_mutating());
    }
}
