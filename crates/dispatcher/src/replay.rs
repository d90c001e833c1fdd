use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use weft_core::{
    ActionError, ActionKind, GraphqlOperation, OfflineEvent, OfflineEventKind, ResolvedRequest,
};
use weft_executor::replay_request;
use weft_offline::ReplayExecutor;

use crate::actions::network::with_action_defaults;
use crate::dispatcher::ActionDispatcher;

/// Replays queued events through a dispatcher.
///
/// Holds a weak reference: the offline queue must not keep the dispatcher
/// alive. Once the dispatcher is gone every replay fails and the events
/// stay queued.
#[derive(Debug, Clone)]
pub struct OfflineReplayer {
    dispatcher: Weak<ActionDispatcher>,
}

impl OfflineReplayer {
    pub fn new(dispatcher: &Arc<ActionDispatcher>) -> Self {
        Self {
            dispatcher: Arc::downgrade(dispatcher),
        }
    }
}

#[async_trait]
impl ReplayExecutor for OfflineReplayer {
    async fn replay(&self, event: &OfflineEvent) -> Result<(), ActionError> {
        let dispatcher = self
            .dispatcher
            .upgrade()
            .ok_or_else(|| ActionError::Configuration("dispatcher dropped".into()))?;
        dispatcher.replay_event(event).await
    }
}

impl ActionDispatcher {
    /// Register this dispatcher as the replay target of the executor's
    /// offline queue. Returns `false` when offline support is disabled.
    pub fn install_replayer(self: &Arc<Self>) -> bool {
        match self.executor.offline() {
            Some(queue) => {
                queue.register_executor(Arc::new(OfflineReplayer::new(self)));
                true
            }
            None => false,
        }
    }

    /// Re-execute one queued event against the live endpoint.
    ///
    /// The stored request snapshot is sent as-is: URL, query, body and
    /// headers were resolved when the event was queued. A request that
    /// carried the session token gets the live one. Events queued without
    /// a snapshot are resolved again from the registry. The response is
    /// written to the event's state path, if any.
    #[instrument(
        name = "dispatcher.replay",
        skip_all,
        fields(event_id = %event.id, ds_id = %event.ds_id)
    )]
    pub async fn replay_event(&self, event: &OfflineEvent) -> Result<(), ActionError> {
        let mut request = if event.url.is_some() {
            replay_request(event)?
        } else {
            self.resolve_from_registry(event)?
        };
        if event.session_auth {
            self.resolver.attach_session_token(&mut request);
        }

        debug!(url = %request.url, "replaying queued event");
        let response = self
            .executor
            .execute_online(&request, event.response_type, &CancellationToken::new())
            .await?;

        if let Some(path) = &event.state_path {
            self.state.set_state(path, response.value());
        }
        info!("queued event replayed");
        Ok(())
    }

    fn resolve_from_registry(&self, event: &OfflineEvent) -> Result<ResolvedRequest, ActionError> {
        let found = self.registry.find(&event.ds_id, &[])?;
        let mut source = (*found).clone();
        let body = match event.kind {
            OfflineEventKind::Rest => {
                if event.method.is_some() {
                    source.method = event.method;
                }
                event.body.clone()
            }
            OfflineEventKind::Graphql => {
                if let Some(query) = &event.query {
                    source.query = Some(query.clone());
                }
                if let Some(operation) = event.operation.as_deref().and_then(graphql_operation) {
                    source.operation = Some(operation);
                }
                event.variables.clone()
            }
            OfflineEventKind::Action => {
                if let Some(kind) = event.operation.as_deref().and_then(ActionKind::parse) {
                    source = with_action_defaults(&source, kind);
                }
                if event.method.is_some() {
                    source.method = event.method;
                }
                event.body.clone().or_else(|| event.variables.clone())
            }
        };

        let scope = self.state.snapshot();
        let mut request = self.resolver.resolve(&source, &self.global, &scope, body)?;
        if let Some(headers) = &event.headers {
            for (name, value) in headers {
                request.headers.entry(name.clone()).or_insert_with(|| value.clone());
            }
        }
        Ok(request)
    }
}

fn graphql_operation(name: &str) -> Option<GraphqlOperation> {
    serde_json::from_value(Value::String(name.to_owned())).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_names() {
        assert_eq!(graphql_operation("mutation"), Some(GraphqlOperation::Mutation));
        assert_eq!(graphql_operation("query"), Some(GraphqlOperation::Query));
        assert_eq!(graphql_operation("upsert"), None);
    }
}
