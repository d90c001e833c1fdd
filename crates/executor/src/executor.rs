use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use weft_core::{
    ActionError, ApiResponse, GraphqlOperation, HttpMethod, ResolvedRequest, ResponseBody,
    ResponseType, RuntimeCallbacks, TokenProvider,
};
use weft_offline::OfflineQueue;

use crate::config::ExecutorConfig;
use crate::decode::decode_response;
use crate::queued::queued_event;
use crate::retry::with_retry;
use crate::transport::{HttpTransport, TransportResponse};

const AUTHORIZATION: &str = "Authorization";

/// Executes resolved REST and GraphQL requests.
///
/// Each call runs inside [`with_retry`] with the request's policy (or the
/// configured default) and a per-attempt timeout. A 401 triggers one
/// refresh-and-retry through the [`TokenProvider`]. While the offline
/// queue reports no connectivity, mutations are queued and reads are served
/// from the cache.
pub struct RequestExecutor {
    transport: Arc<dyn HttpTransport>,
    config: ExecutorConfig,
    tokens: Option<Arc<dyn TokenProvider>>,
    runtime: Option<Arc<dyn RuntimeCallbacks>>,
    offline: Option<Arc<OfflineQueue>>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("config", &self.config)
            .field("tokens", &self.tokens.is_some())
            .field("offline", &self.offline.is_some())
            .finish_non_exhaustive()
    }
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn HttpTransport>, config: ExecutorConfig) -> Self {
        Self {
            transport,
            config,
            tokens: None,
            runtime: None,
            offline: None,
        }
    }

    #[must_use]
    pub fn with_tokens(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    #[must_use]
    pub fn with_runtime(mut self, runtime: Arc<dyn RuntimeCallbacks>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    #[must_use]
    pub fn with_offline(mut self, offline: Arc<OfflineQueue>) -> Self {
        self.offline = Some(offline);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn offline(&self) -> Option<&Arc<OfflineQueue>> {
        self.offline.as_ref().filter(|q| q.is_enabled())
    }

    /// Execute `request`, decoding the body as `expected` when given.
    ///
    /// # Errors
    ///
    /// - [`ActionError::Network`] for non-2xx statuses (after retries for
    ///   retryable ones)
    /// - [`ActionError::Cancelled`] when `cancel` fires first
    /// - [`ActionError::OfflineUnavailable`] for an uncached read while
    ///   offline
    /// - [`ActionError::TokenRefresh`] when a 401 could not be recovered
    /// - [`ActionError::GraphQl`] for an error envelope without data
    #[instrument(skip_all, fields(ds_id = %request.data_source_id, method = %request.method))]
    pub async fn execute(
        &self,
        request: &ResolvedRequest,
        expected: Option<ResponseType>,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, ActionError> {
        self.run(request, expected, cancel, self.offline()).await
    }

    /// Like [`execute`](Self::execute) but never queues, never reads or
    /// writes the offline cache. Used when replaying queued events.
    ///
    /// # Errors
    ///
    /// As for [`execute`](Self::execute), minus the offline outcomes.
    #[instrument(skip_all, fields(ds_id = %request.data_source_id, method = %request.method))]
    pub async fn execute_online(
        &self,
        request: &ResolvedRequest,
        expected: Option<ResponseType>,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, ActionError> {
        self.run(request, expected, cancel, None).await
    }

    async fn run(
        &self,
        request: &ResolvedRequest,
        expected: Option<ResponseType>,
        cancel: &CancellationToken,
        offline: Option<&Arc<OfflineQueue>>,
    ) -> Result<ApiResponse, ActionError> {
        if request.method == HttpMethod::Websocket
            || request
                .graphql
                .as_ref()
                .is_some_and(|g| g.operation == GraphqlOperation::Subscription)
        {
            return Err(ActionError::Unsupported(
                "streaming operations go through the subscription manager".into(),
            ));
        }
        if cancel.is_cancelled() {
            return Err(ActionError::Cancelled);
        }

        let mutating = is_mutating(request);
        if let Some(offline) = offline {
            if !offline.is_online() {
                return self.offline_fallback(offline, request, mutating, None).await;
            }
        }

        let policy = request.retry.clone().unwrap_or_else(|| self.config.retry.clone());
        let result = with_retry(
            |attempt| self.attempt(request, expected, attempt),
            &policy,
            cancel,
            self.runtime.as_deref(),
        )
        .await;

        let result = match result {
            Err(ActionError::Network { status: 401, .. }) if self.can_refresh() => {
                self.refresh_and_retry(request, expected, cancel).await
            }
            other => other,
        };

        match result {
            Ok(response) => {
                if let Some(offline) = offline.filter(|_| !mutating) {
                    self.cache_read(offline, request, &response).await;
                }
                Ok(response)
            }
            Err(err @ ActionError::Transport(_)) => match offline {
                Some(offline) => self.offline_fallback(offline, request, mutating, Some(err)).await,
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    async fn attempt(
        &self,
        request: &ResolvedRequest,
        expected: Option<ResponseType>,
        attempt: u32,
    ) -> Result<ApiResponse, ActionError> {
        let budget = request.timeout.unwrap_or(self.config.request_timeout);
        debug!(attempt, url = %request.url, timeout_ms = %budget.as_millis(), "sending request");
        let response = tokio::time::timeout(budget, self.transport.send(request))
            .await
            .map_err(|_| ActionError::Timeout(budget))??;
        to_api_response(request, &response, expected)
    }

    fn can_refresh(&self) -> bool {
        self.tokens.as_ref().is_some_and(|t| t.can_refresh())
    }

    async fn refresh_and_retry(
        &self,
        request: &ResolvedRequest,
        expected: Option<ResponseType>,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, ActionError> {
        let Some(tokens) = self.tokens.as_ref() else {
            return Err(ActionError::network(401, "unauthorized"));
        };
        info!(ds_id = %request.data_source_id, "401 received, refreshing token");

        let refreshed = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ActionError::Cancelled),
            refreshed = tokens.refresh_token() => refreshed,
        };

        match refreshed {
            Ok(token) => {
                let mut retried = request.clone();
                retried.set_header(AUTHORIZATION, format!("Bearer {token}"));
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(ActionError::Cancelled),
                    result = self.attempt(&retried, expected, 0) => result,
                }
            }
            Err(err) => {
                warn!(error = %err, "token refresh failed, redirecting to login");
                if let Some(runtime) = &self.runtime {
                    runtime.navigate(&self.config.login_path, true);
                }
                Err(match err {
                    e @ ActionError::TokenRefresh(_) => e,
                    other => ActionError::TokenRefresh(other.to_string()),
                })
            }
        }
    }

    async fn offline_fallback(
        &self,
        offline: &OfflineQueue,
        request: &ResolvedRequest,
        mutating: bool,
        network_error: Option<ActionError>,
    ) -> Result<ApiResponse, ActionError> {
        if mutating {
            let session = self.tokens.as_ref().and_then(|t| t.access_token());
            let event = queued_event(request, session.as_deref());
            let event_id = offline.queue_event(event).await?;
            info!(
                event_id = %event_id,
                ds_id = %request.data_source_id,
                "request queued for offline replay"
            );
            return Ok(ApiResponse::queued(event_id));
        }

        match offline.get_cached_data(&cache_key(request)).await {
            Ok(Some(value)) => {
                debug!(ds_id = %request.data_source_id, "serving read from offline cache");
                let mut response = ApiResponse::json(200, value);
                response.from_cache = true;
                Ok(response)
            }
            Ok(None) => Err(network_error.unwrap_or_else(|| {
                ActionError::OfflineUnavailable(format!("no cached data for {}", request.url))
            })),
            Err(e) => Err(network_error.unwrap_or_else(|| e.into())),
        }
    }

    async fn cache_read(
        &self,
        offline: &OfflineQueue,
        request: &ResolvedRequest,
        response: &ApiResponse,
    ) {
        if !self.config.cache_reads {
            return;
        }
        if !matches!(response.body, ResponseBody::Json(_) | ResponseBody::Text(_)) {
            return;
        }
        if let Err(e) = offline.set_cached_data(&cache_key(request), &response.value()).await {
            warn!(error = %e, "failed to cache response");
        }
    }
}

fn is_mutating(request: &ResolvedRequest) -> bool {
    match &request.graphql {
        Some(graphql) => graphql.operation == GraphqlOperation::Mutation,
        None => request.method.is_mutating(),
    }
}

/// Cache key for a read. GraphQL queries are keyed by their document and
/// variables as well as the endpoint.
fn cache_key(request: &ResolvedRequest) -> String {
    match &request.graphql {
        Some(graphql) => format!("GRAPHQL:{}:{}:{}", request.url, graphql.query, graphql.variables),
        None => request.cache_key(),
    }
}

fn to_api_response(
    request: &ResolvedRequest,
    response: &TransportResponse,
    expected: Option<ResponseType>,
) -> Result<ApiResponse, ActionError> {
    let body = decode_response(response, expected);

    if !(200..300).contains(&response.status) {
        let value = body.to_value();
        let message = error_message(&value).unwrap_or_else(|| format!("HTTP {}", response.status));
        return Err(ActionError::Network {
            status: response.status,
            message,
            body: (!value.is_null()).then_some(value),
        });
    }

    let body = if request.graphql.is_some() {
        graphql_data(body)?
    } else {
        body
    };

    Ok(ApiResponse {
        status: response.status,
        headers: response.headers.clone(),
        body,
        from_cache: false,
        queued: None,
    })
}

fn error_message(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() && s.len() <= 500 => Some(s.clone()),
        serde_json::Value::Object(map) => ["message", "error", "detail"]
            .iter()
            .find_map(|k| map.get(*k).and_then(serde_json::Value::as_str))
            .map(str::to_owned),
        _ => None,
    }
}

/// Unwrap a GraphQL envelope. An `errors` array with no `data` is an error;
/// partial data succeeds.
fn graphql_data(body: ResponseBody) -> Result<ResponseBody, ActionError> {
    let ResponseBody::Json(mut envelope) = body else {
        return Ok(body);
    };
    let data = envelope.get_mut("data").map(serde_json::Value::take);
    let errors: Vec<String> = envelope
        .get("errors")
        .and_then(serde_json::Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .map(|e| {
                    e.get("message")
                        .and_then(serde_json::Value::as_str)
                        .map_or_else(|| e.to_string(), str::to_owned)
                })
                .collect()
        })
        .unwrap_or_default();

    match data {
        Some(data) if !data.is_null() => {
            if !errors.is_empty() {
                warn!(errors = %errors.join("; "), "GraphQL response carried partial errors");
            }
            Ok(ResponseBody::Json(data))
        }
        _ if !errors.is_empty() => Err(ActionError::GraphQl(errors.join("; "))),
        _ => Ok(ResponseBody::Json(serde_json::Value::Null)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    use weft_core::{BackoffStrategy, GraphqlRequest, RequestBody, RetryPolicy, ToastVariant};
    use weft_offline::OfflineConfig;
    use weft_store_memory::MemoryStore;

    use super::*;

    #[derive(Default)]
    struct QueueTransport {
        responses: Mutex<VecDeque<Result<TransportResponse, ActionError>>>,
        seen: Mutex<Vec<ResolvedRequest>>,
    }

    impl QueueTransport {
        fn with(responses: Vec<Result<TransportResponse, ActionError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpTransport for QueueTransport {
        async fn send(&self, request: &ResolvedRequest) -> Result<TransportResponse, ActionError> {
            self.seen.lock().push(request.clone());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ActionError::Transport("no scripted response".into())))
        }
    }

    struct Tokens {
        refresh: Result<String, ActionError>,
    }

    #[async_trait]
    impl TokenProvider for Tokens {
        fn access_token(&self) -> Option<String> {
            Some("old".into())
        }
        fn can_refresh(&self) -> bool {
            true
        }
        async fn refresh_token(&self) -> Result<String, ActionError> {
            self.refresh.clone()
        }
    }

    #[derive(Default)]
    struct Runtime {
        navigations: Mutex<Vec<String>>,
        toasts: Mutex<Vec<String>>,
    }

    impl RuntimeCallbacks for Runtime {
        fn toast(&self, message: &str, _variant: ToastVariant) {
            self.toasts.lock().push(message.to_owned());
        }
        fn navigate(&self, href: &str, _replace: bool) {
            self.navigations.lock().push(href.to_owned());
        }
        fn open_modal(&self, _id: &str) {}
        fn close_modal(&self, _id: &str) {}
    }

    fn get(url: &str) -> ResolvedRequest {
        let mut req = ResolvedRequest::new("ds", HttpMethod::Get, url);
        req.retry = Some(RetryPolicy::new(
            3,
            Duration::from_millis(10),
            BackoffStrategy::Exponential,
        ));
        req
    }

    fn offline_queue() -> Arc<OfflineQueue> {
        Arc::new(OfflineQueue::new(
            Arc::new(MemoryStore::new()),
            OfflineConfig::default(),
        ))
    }

    #[tokio::test]
    async fn decodes_successful_json() {
        let transport =
            QueueTransport::with(vec![Ok(TransportResponse::json(200, &json!({"id": 1})))]);
        let executor = RequestExecutor::new(transport, ExecutorConfig::default());
        let resp = executor
            .execute(&get("https://x/items/1"), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.value(), json!({"id": 1}));
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let transport = QueueTransport::with(vec![
            Ok(TransportResponse::json(404, &json!({"message": "no such item"}))),
            Ok(TransportResponse::json(200, &json!({}))),
        ]);
        let executor = RequestExecutor::new(transport.clone(), ExecutorConfig::default());
        let err = executor
            .execute(&get("https://x/items/9"), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.info().message, "no such item");
        assert_eq!(transport.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        tokio::time::pause();
        let transport = QueueTransport::with(vec![
            Ok(TransportResponse::new(503, "")),
            Ok(TransportResponse::new(502, "")),
            Ok(TransportResponse::json(200, &json!({"ok": true}))),
        ]);
        let executor = RequestExecutor::new(transport.clone(), ExecutorConfig::default());
        let resp = executor
            .execute(&get("https://x/flaky"), None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(resp.is_success());
        assert_eq!(transport.seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn attempt_timeout_is_a_retryable_timeout() {
        struct Hang;
        #[async_trait]
        impl HttpTransport for Hang {
            async fn send(
                &self,
                _request: &ResolvedRequest,
            ) -> Result<TransportResponse, ActionError> {
                std::future::pending().await
            }
        }
        tokio::time::pause();
        let executor = RequestExecutor::new(Arc::new(Hang), ExecutorConfig::default());
        let mut req = get("https://x/slow");
        req.timeout = Some(Duration::from_millis(50));
        req.retry = Some(RetryPolicy::single_attempt());
        let err = executor
            .execute(&req, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, ActionError::Timeout(Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn unauthorized_refreshes_once_and_retries() {
        let transport = QueueTransport::with(vec![
            Ok(TransportResponse::new(401, "")),
            Ok(TransportResponse::json(200, &json!({"me": "ada"}))),
        ]);
        let executor = RequestExecutor::new(transport.clone(), ExecutorConfig::default())
            .with_tokens(Arc::new(Tokens {
                refresh: Ok("fresh".into()),
            }));
        let resp = executor
            .execute(&get("https://x/me"), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.value(), json!({"me": "ada"}));
        let seen = transport.seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].header("authorization"), Some("Bearer fresh"));
    }

    #[tokio::test]
    async fn failed_refresh_navigates_to_login() {
        let transport = QueueTransport::with(vec![Ok(TransportResponse::new(401, ""))]);
        let runtime = Arc::new(Runtime::default());
        let executor = RequestExecutor::new(transport, ExecutorConfig::default())
            .with_tokens(Arc::new(Tokens {
                refresh: Err(ActionError::TokenRefresh("expired".into())),
            }))
            .with_runtime(runtime.clone());
        let err = executor
            .execute(&get("https://x/me"), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::TokenRefresh(_)));
        assert_eq!(runtime.navigations.lock().as_slice(), ["/login"]);
    }

    #[tokio::test]
    async fn graphql_error_envelope_without_data_fails() {
        let transport = QueueTransport::with(vec![Ok(TransportResponse::json(
            200,
            &json!({"errors": [{"message": "bad field"}], "data": null}),
        ))]);
        let executor = RequestExecutor::new(transport, ExecutorConfig::default());
        let mut req = get("https://x/graphql");
        req.method = HttpMethod::Graphql;
        req.graphql = Some(GraphqlRequest {
            operation: GraphqlOperation::Query,
            query: "{ a }".into(),
            variables: json!({}),
        });
        let err = executor
            .execute(&req, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, ActionError::GraphQl("bad field".into()));
    }

    #[tokio::test]
    async fn graphql_partial_data_succeeds() {
        let transport = QueueTransport::with(vec![Ok(TransportResponse::json(
            200,
            &json!({"errors": [{"message": "one field failed"}], "data": {"a": 1}}),
        ))]);
        let executor = RequestExecutor::new(transport, ExecutorConfig::default());
        let mut req = get("https://x/graphql");
        req.method = HttpMethod::Graphql;
        req.graphql = Some(GraphqlRequest {
            operation: GraphqlOperation::Query,
            query: "{ a }".into(),
            variables: json!({}),
        });
        let resp = executor.execute(&req, None, &CancellationToken::new()).await.unwrap();
        assert_eq!(resp.value(), json!({"a": 1}));
    }

    #[tokio::test]
    async fn offline_mutation_is_queued() {
        let transport = QueueTransport::with(vec![]);
        let offline = offline_queue();
        offline.set_online(false).await.unwrap();
        let executor = RequestExecutor::new(transport.clone(), ExecutorConfig::default())
            .with_tokens(Arc::new(Tokens {
                refresh: Ok("new".into()),
            }))
            .with_offline(offline.clone());

        let mut req = ResolvedRequest::new("todos", HttpMethod::Post, "https://x/todos?draft=1")
            .with_body(RequestBody::Json(json!({"title": "milk"})));
        req.set_header("Authorization", "Bearer old");
        let resp = executor.execute(&req, None, &CancellationToken::new()).await.unwrap();

        assert_eq!(resp.status, 202);
        assert!(resp.queued.is_some());
        assert!(transport.seen.lock().is_empty());
        let pending = offline.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].body, Some(json!({"title": "milk"})));
        assert!(pending[0].headers.is_none());
        assert!(pending[0].session_auth);
        assert_eq!(pending[0].url.as_deref(), Some("https://x/todos"));
        assert_eq!(pending[0].query_params.as_ref().unwrap()["draft"], json!("1"));
    }

    #[tokio::test]
    async fn offline_read_without_cache_is_unavailable() {
        let offline = offline_queue();
        offline.set_online(false).await.unwrap();
        let executor = RequestExecutor::new(QueueTransport::with(vec![]), ExecutorConfig::default())
            .with_offline(offline);
        let err = executor
            .execute(&get("https://x/todos"), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::OfflineUnavailable(_)));
    }

    #[tokio::test]
    async fn successful_reads_are_served_from_cache_offline() {
        let offline = offline_queue();
        let transport =
            QueueTransport::with(vec![Ok(TransportResponse::json(200, &json!([1, 2])))]);
        let executor = RequestExecutor::new(transport, ExecutorConfig::default())
            .with_offline(offline.clone());
        let req = get("https://x/todos");

        executor.execute(&req, None, &CancellationToken::new()).await.unwrap();
        offline.set_online(false).await.unwrap();

        let cached = executor.execute(&req, None, &CancellationToken::new()).await.unwrap();
        assert!(cached.from_cache);
        assert_eq!(cached.value(), json!([1, 2]));
    }

    #[tokio::test]
    async fn unreachable_network_queues_mutation() {
        tokio::time::pause();
        let offline = offline_queue();
        let transport = QueueTransport::with(vec![]);
        let executor = RequestExecutor::new(transport, ExecutorConfig::default())
            .with_offline(offline.clone());
        let mut req = ResolvedRequest::new("todos", HttpMethod::Delete, "https://x/todos/1");
        req.retry = Some(RetryPolicy::single_attempt());
        let resp = executor.execute(&req, None, &CancellationToken::new()).await.unwrap();
        assert!(resp.queued.is_some());
        assert_eq!(offline.pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn online_execution_bypasses_the_queue() {
        tokio::time::pause();
        let offline = offline_queue();
        let executor = RequestExecutor::new(QueueTransport::with(vec![]), ExecutorConfig::default())
            .with_offline(offline.clone());
        let mut req = ResolvedRequest::new("todos", HttpMethod::Post, "https://x/todos");
        req.retry = Some(RetryPolicy::single_attempt());
        let err = executor
            .execute_online(&req, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Transport(_)));
        assert!(offline.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn streaming_requests_are_rejected() {
        let executor =
            RequestExecutor::new(QueueTransport::with(vec![]), ExecutorConfig::default());
        let req = ResolvedRequest::new("ws", HttpMethod::Websocket, "wss://x");
        assert!(matches!(
            executor.execute(&req, None, &CancellationToken::new()).await,
            Err(ActionError::Unsupported(_))
        ));
    }
}
