//! Conversion between resolved requests and queued offline events.

use std::collections::BTreeMap;

use serde_json::Value;

use weft_core::{
    ActionError, BodyEncoding, GraphqlOperation, GraphqlRequest, HttpMethod, OfflineEvent,
    OfflineEventKind, RequestBody, ResolvedRequest,
};

const AUTHORIZATION: &str = "Authorization";

/// Snapshot `request` as a queued event.
///
/// An `Authorization` header carrying `session_token` is dropped and
/// recorded as `session_auth`; any other credential header is kept.
pub fn queued_event(request: &ResolvedRequest, session_token: Option<&str>) -> OfflineEvent {
    let session_header = session_token.map(|token| format!("Bearer {token}"));
    let mut session_auth = false;
    let headers: BTreeMap<String, String> = request
        .headers
        .iter()
        .filter(|(name, value)| {
            let strip = name.eq_ignore_ascii_case(AUTHORIZATION)
                && session_header.as_deref() == Some(value.as_str());
            session_auth |= strip;
            !strip
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut event = match &request.graphql {
        Some(graphql) => {
            let mut event =
                OfflineEvent::new(OfflineEventKind::Graphql, request.data_source_id.clone())
                    .with_operation(operation_name(graphql.operation));
            event.query = Some(graphql.query.clone());
            event.variables = Some(graphql.variables.clone());
            event
        }
        None => {
            let mut event =
                OfflineEvent::new(OfflineEventKind::Rest, request.data_source_id.clone());
            event.body = request.body.to_value();
            event.encoding = encoding_of(&request.body);
            event
        }
    };
    event.method = Some(request.method);

    let (url, query) = split_query(&request.url);
    event.url = Some(url.to_owned());
    if let Some(query) = query {
        match query_map(query) {
            Some(params) => event.query_params = Some(params),
            // Unparseable query strings are kept verbatim on the URL.
            None => event.url = Some(request.url.clone()),
        }
    }
    if !headers.is_empty() {
        event.headers = Some(headers);
    }
    if request.credentials != weft_core::CredentialsMode::default() {
        event.credentials = Some(request.credentials);
    }
    event.session_auth = session_auth;
    event
}

/// Rebuild the request stored in a queued event.
///
/// # Errors
///
/// Returns [`ActionError::Validation`] when the event carries no URL, and
/// [`ActionError::Serialization`] when its body or query cannot be encoded.
pub fn replay_request(event: &OfflineEvent) -> Result<ResolvedRequest, ActionError> {
    let base = event
        .url
        .as_deref()
        .ok_or_else(|| ActionError::Validation(format!("queued event {} has no URL", event.id)))?;
    let url = match &event.query_params {
        Some(params) if !params.is_empty() => {
            let pairs = query_pairs(params);
            let encoded = serde_urlencoded::to_string(&pairs)
                .map_err(|e| ActionError::Serialization(e.to_string()))?;
            let separator = if base.contains('?') { '&' } else { '?' };
            format!("{base}{separator}{encoded}")
        }
        _ => base.to_owned(),
    };

    let method = event.method.unwrap_or(match event.kind {
        OfflineEventKind::Graphql => HttpMethod::Graphql,
        _ => HttpMethod::Post,
    });
    let mut request = ResolvedRequest::new(event.ds_id.clone(), method, url);
    if let Some(headers) = &event.headers {
        request.headers.clone_from(headers);
    }
    if let Some(credentials) = event.credentials {
        request.credentials = credentials;
    }

    match event.kind {
        OfflineEventKind::Graphql => {
            let query = event.query.clone().ok_or_else(|| {
                ActionError::Validation(format!("queued event {} has no GraphQL query", event.id))
            })?;
            let graphql = GraphqlRequest {
                operation: event
                    .operation
                    .as_deref()
                    .and_then(parse_operation)
                    .unwrap_or(GraphqlOperation::Mutation),
                query,
                variables: event
                    .variables
                    .clone()
                    .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
            };
            request.body = RequestBody::Json(graphql.wire_body());
            request.graphql = Some(graphql);
        }
        OfflineEventKind::Rest | OfflineEventKind::Action => {
            if let Some(body) = &event.body {
                request.body = decode_body(body, event.encoding.unwrap_or_default())?;
            }
        }
    }
    Ok(request)
}

fn operation_name(operation: GraphqlOperation) -> &'static str {
    match operation {
        GraphqlOperation::Query => "query",
        GraphqlOperation::Mutation => "mutation",
        GraphqlOperation::Subscription => "subscription",
    }
}

fn parse_operation(name: &str) -> Option<GraphqlOperation> {
    match name {
        "query" => Some(GraphqlOperation::Query),
        "mutation" => Some(GraphqlOperation::Mutation),
        "subscription" => Some(GraphqlOperation::Subscription),
        _ => None,
    }
}

fn encoding_of(body: &RequestBody) -> Option<BodyEncoding> {
    match body {
        RequestBody::Empty | RequestBody::Json(_) => None,
        RequestBody::Form(_) => Some(BodyEncoding::Form),
        RequestBody::Raw(_) => Some(BodyEncoding::Raw),
        RequestBody::Multipart(_) => Some(BodyEncoding::Multipart),
    }
}

fn decode_body(body: &Value, encoding: BodyEncoding) -> Result<RequestBody, ActionError> {
    let invalid =
        |what: &str| ActionError::Serialization(format!("queued {what} body is malformed"));
    Ok(match encoding {
        BodyEncoding::Json => RequestBody::Json(body.clone()),
        BodyEncoding::Form => {
            let map = body.as_object().ok_or_else(|| invalid("form"))?;
            RequestBody::Form(map.iter().map(|(k, v)| (k.clone(), scalar(v))).collect())
        }
        BodyEncoding::Raw => {
            RequestBody::Raw(body.as_str().ok_or_else(|| invalid("raw"))?.to_owned())
        }
        BodyEncoding::Multipart => {
            serde_json::from_value(body.clone()).map_err(|_| invalid("multipart"))?
        }
    })
}

fn split_query(url: &str) -> (&str, Option<&str>) {
    match url.split_once('?') {
        Some((base, query)) if !query.is_empty() => (base, Some(query)),
        Some((base, _)) => (base, None),
        None => (url, None),
    }
}

/// Decoded query pairs; a repeated key becomes an array.
fn query_map(query: &str) -> Option<BTreeMap<String, Value>> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).ok()?;
    let mut map: BTreeMap<String, Value> = BTreeMap::new();
    for (key, value) in pairs {
        match map.get_mut(&key) {
            Some(Value::Array(items)) => items.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                map.insert(key, Value::String(value));
            }
        }
    }
    Some(map)
}

fn scalar(value: &Value) -> String {
    value.as_str().map_or_else(|| value.to_string(), str::to_owned)
}

fn query_pairs(params: &BTreeMap<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in params {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                pairs.extend(items.iter().map(|item| (key.clone(), scalar(item))));
            }
            other => pairs.push((key.clone(), scalar(other))),
        }
    }
    pairs
}
