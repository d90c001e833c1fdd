use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use weft_core::{ActionError, HttpMethod};

use crate::actions::network::build_request;
use crate::context::ActionContext;
use crate::strategy::ActionStrategy;

/// `graphql_subscription`: open a subscription (or a raw socket for a
/// `WEBSOCKET` data source) and write every payload to the handler's
/// response state path.
///
/// The stream outlives the dispatch. It stays registered under the
/// invocation id until the server ends it or
/// [`ActionDispatcher::cancel`](crate::ActionDispatcher::cancel) is called.
#[derive(Debug, Clone, Copy)]
pub struct Subscribe;

#[async_trait]
impl ActionStrategy for Subscribe {
    async fn execute(&self, cx: &ActionContext<'_>) -> Result<Value, ActionError> {
        let dispatcher = cx.dispatcher();
        let Some(manager) = dispatcher.subscriptions.as_ref() else {
            return Err(ActionError::Unsupported("no subscription manager configured".into()));
        };
        let request = build_request(cx, cx.handler().param("variables").map(|v| cx.resolve(v)))?;

        let target = cx
            .handler()
            .response
            .as_ref()
            .and_then(|r| r.state_path.as_deref())
            .map(|template| dispatcher.resolve_str(template, &cx.scope()))
            .or_else(|| cx.param_str(&["statePath"]));

        let token = CancellationToken::new();
        let mut handle = if request.graphql.is_none() && request.method == HttpMethod::Websocket {
            manager.open_socket(&request, token.clone())?
        } else {
            manager.subscribe(&request, token.clone())?
        };
        let subscription_id = handle.id().to_owned();
        let invocation_id = cx.invocation_id().clone();
        dispatcher.streams.insert(invocation_id.clone(), token);
        info!(sub_id = %subscription_id, invocation_id = %invocation_id, "subscription registered");

        let state = Arc::clone(&dispatcher.state);
        let streams = Arc::clone(&dispatcher.streams);
        tokio::spawn(async move {
            while let Some(event) = handle.next().await {
                match event {
                    Ok(payload) => {
                        if let Some(path) = &target {
                            state.set_state(path, payload);
                        }
                    }
                    Err(e) => {
                        warn!(invocation_id = %invocation_id, error = %e, "subscription error");
                    }
                }
            }
            streams.remove(&invocation_id);
            debug!(invocation_id = %invocation_id, "subscription ended");
        });

        Ok(json!({"subscriptionId": subscription_id}))
    }
}
