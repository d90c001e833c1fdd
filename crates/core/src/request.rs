use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::datasource::{CredentialsMode, GraphqlOperation, HttpMethod, SubscriptionProtocol};
use crate::retry::RetryPolicy;
use crate::types::DataSourceId;

/// One part of a multipart body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultipartPart {
    pub name: String,
    pub value: PartValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartValue {
    Text(String),
    File {
        filename: String,
        content_type: Option<String>,
        data: Vec<u8>,
    },
}

/// Encoded request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
    Raw(String),
    Multipart(Vec<MultipartPart>),
}

impl RequestBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Multipart and binary payloads need the transport to set the
    /// boundary-bearing content type itself.
    pub fn is_multipart(&self) -> bool {
        matches!(self, Self::Multipart(_))
    }

    /// JSON view of the body, used when persisting an offline event.
    pub fn to_value(&self) -> Option<serde_json::Value> {
        match self {
            Self::Empty => None,
            Self::Json(v) => Some(v.clone()),
            Self::Form(pairs) => Some(serde_json::Value::Object(
                pairs
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                    .collect(),
            )),
            Self::Raw(s) => Some(serde_json::Value::String(s.clone())),
            Self::Multipart(_) => serde_json::to_value(self).ok(),
        }
    }
}

/// GraphQL operation carried by a resolved request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlRequest {
    pub operation: GraphqlOperation,
    pub query: String,
    pub variables: serde_json::Value,
}

impl GraphqlRequest {
    /// Wire body: `{query, variables}`.
    pub fn wire_body(&self) -> serde_json::Value {
        serde_json::json!({
            "query": self.query,
            "variables": self.variables,
        })
    }
}

/// Concrete request plan produced by resolving a data source.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRequest {
    pub data_source_id: DataSourceId,
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: RequestBody,
    pub credentials: CredentialsMode,
    pub timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    pub graphql: Option<GraphqlRequest>,
    pub subscription_protocol: Option<SubscriptionProtocol>,
}

impl ResolvedRequest {
    pub fn new(
        data_source_id: impl Into<DataSourceId>,
        method: HttpMethod,
        url: impl Into<String>,
    ) -> Self {
        Self {
            data_source_id: data_source_id.into(),
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: RequestBody::Empty,
            credentials: CredentialsMode::default(),
            timeout: None,
            retry: None,
            graphql: None,
            subscription_protocol: None,
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// Set a header, replacing any existing spelling of the same name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.remove_header(name);
        self.headers.insert(name.to_owned(), value.into());
    }

    /// Remove every spelling of a header.
    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
    }

    /// Key under which a successful read is cached for offline use.
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.method, self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_case_insensitive() {
        let mut req = ResolvedRequest::new("ds", HttpMethod::Post, "https://x/y");
        req.set_header("content-type", "application/json");
        assert_eq!(req.header("Content-Type"), Some("application/json"));
        req.set_header("Content-Type", "text/plain");
        assert_eq!(req.headers.len(), 1);
        req.remove_header("CONTENT-TYPE");
        assert!(!req.has_header("content-type"));
    }

    #[test]
    fn form_body_as_value() {
        let body = RequestBody::Form(vec![("a".into(), "1".into())]);
        assert_eq!(body.to_value(), Some(serde_json::json!({"a": "1"})));
        assert_eq!(RequestBody::Empty.to_value(), None);
    }

    #[test]
    fn graphql_wire_body() {
        let gql = GraphqlRequest {
            operation: GraphqlOperation::Query,
            query: "{ me { id } }".into(),
            variables: serde_json::json!({}),
        };
        assert_eq!(
            gql.wire_body(),
            serde_json::json!({"query": "{ me { id } }", "variables": {}})
        );
    }
}
