use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use weft_core::{
    ActionError, ActionKind, DataSource, GraphqlOperation, HttpMethod, ResolvedRequest,
    TelemetryEvent,
};

use crate::context::ActionContext;
use crate::strategy::ActionStrategy;

/// Marker key set on the result of a request that was queued offline.
pub(crate) const QUEUED_KEY: &str = "queued";

/// `api_call`, the CRUD kinds, `graphql`, `graphql_mutation` and
/// `ai_generate`.
///
/// CRUD kinds supply the method when the data source omits one. The
/// request body comes from `params.body` (`params.variables` for GraphQL);
/// `ai_generate` posts its resolved parameters when no body is given.
#[derive(Debug, Clone, Copy)]
pub struct RequestAction;

#[async_trait]
impl ActionStrategy for RequestAction {
    async fn execute(&self, cx: &ActionContext<'_>) -> Result<Value, ActionError> {
        let kind = cx.handler().action;
        let body = match kind {
            ActionKind::Graphql | ActionKind::GraphqlMutation => {
                cx.handler().param("variables").map(|v| cx.resolve(v))
            }
            ActionKind::AiGenerate => Some(cx.param("body").unwrap_or_else(|| cx.params())),
            _ => cx.param("body"),
        };
        send(cx, body).await
    }
}

/// `audit_log`: track a telemetry event carrying the resolved parameters
/// and, when a data source is named, post them to it as well.
#[derive(Debug, Clone, Copy)]
pub struct AuditLog;

#[async_trait]
impl ActionStrategy for AuditLog {
    async fn execute(&self, cx: &ActionContext<'_>) -> Result<Value, ActionError> {
        let mut entry = cx.params();
        if let Value::Object(map) = &mut entry {
            map.insert("invocationId".into(), Value::String(cx.invocation_id().to_string()));
        }
        let name = cx.param_str(&["event"]).unwrap_or_else(|| "audit_log".to_owned());
        cx.dispatcher()
            .telemetry
            .track(TelemetryEvent::new(name, entry.clone()));

        if cx.handler().data_source_id.is_some() {
            send(cx, Some(entry)).await
        } else {
            Ok(entry)
        }
    }
}

/// Build the request for the handler's data source.
pub(crate) fn build_request(
    cx: &ActionContext<'_>,
    body: Option<Value>,
) -> Result<ResolvedRequest, ActionError> {
    let id = cx.data_source_id()?;
    let dispatcher = cx.dispatcher();
    let found = dispatcher.registry.find(id, cx.local_sources())?;
    let source = with_action_defaults(&found, cx.handler().action);
    dispatcher
        .resolver
        .resolve(&source, &dispatcher.global, &cx.scope(), body)
}

/// Apply what the action kind implies to a copy of `ds`.
pub(crate) fn with_action_defaults(ds: &DataSource, kind: ActionKind) -> DataSource {
    let mut ds = ds.clone();
    if ds.method.is_none() {
        ds.method = kind.crud_method();
    }
    match kind {
        ActionKind::GraphqlMutation if ds.operation.is_none() => {
            ds.operation = Some(GraphqlOperation::Mutation);
        }
        ActionKind::GraphqlSubscription if ds.operation.is_none() => {
            ds.operation = Some(GraphqlOperation::Subscription);
        }
        ActionKind::AiGenerate if ds.method.is_none() && ds.query.is_none() => {
            ds.method = Some(HttpMethod::Post);
        }
        _ => {}
    }
    ds
}

async fn send(cx: &ActionContext<'_>, body: Option<Value>) -> Result<Value, ActionError> {
    let request = build_request(cx, body)?;
    let expected = cx.handler().response.as_ref().and_then(|r| r.response_type);
    debug!(ds_id = %request.data_source_id, url = %request.url, "executing request");

    let response = cx
        .dispatcher()
        .executor
        .execute(&request, expected, cx.cancel())
        .await?;

    if let Some(event_id) = &response.queued {
        info!(event_id = %event_id, "request queued until connectivity returns");
        return Ok(json!({"queued": true, "eventId": event_id}));
    }
    Ok(response.value())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crud_kinds_fill_in_the_method() {
        let ds = DataSource::new("todos", "/todos");
        assert_eq!(
            with_action_defaults(&ds, ActionKind::CrudCreate).method,
            Some(HttpMethod::Post)
        );
        assert_eq!(
            with_action_defaults(&ds, ActionKind::CrudDelete).method,
            Some(HttpMethod::Delete)
        );
        assert_eq!(with_action_defaults(&ds, ActionKind::ApiCall).method, None);

        let explicit = DataSource::new("todos", "/todos").with_method(HttpMethod::Patch);
        assert_eq!(
            with_action_defaults(&explicit, ActionKind::CrudUpdate).method,
            Some(HttpMethod::Patch)
        );
    }

    #[test]
    fn graphql_kinds_pick_the_operation() {
        let mut ds = DataSource::new("gql", "/graphql");
        ds.query = Some("mutation { x }".into());
        assert_eq!(
            with_action_defaults(&ds, ActionKind::GraphqlMutation).operation,
            Some(GraphqlOperation::Mutation)
        );
        assert_eq!(with_action_defaults(&ds, ActionKind::Graphql).operation, None);
    }
}
