//! GraphQL subscriptions and raw WebSocket streams.
//!
//! Each subscription owns a background task that connects, performs the
//! sub-protocol handshake, forwards payloads into a bounded channel, and
//! reconnects with capped exponential backoff when the socket drops. The
//! task stops when the stream completes, the handle is dropped, or its
//! cancellation token fires; on cancellation the server is told to stop the
//! operation before the socket is closed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use weft_core::{ActionError, GraphqlRequest, ResolvedRequest, SubscriptionProtocol};

use crate::config::ExecutorConfig;
use crate::socket::{SocketChannel, SocketConnector, socket_url};

const EVENT_BUFFER: usize = 32;

type Event = Result<Value, ActionError>;

/// Handle to a running subscription.
///
/// Dropping the handle cancels the subscription.
pub struct SubscriptionHandle {
    id: String,
    events: mpsc::Receiver<Event>,
    outbound: Option<mpsc::Sender<String>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SubscriptionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next payload, an error reported by the server, or `None` once the
    /// stream has ended.
    pub async fn next(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Send a JSON message over a raw socket.
    pub async fn send(&self, message: &Value) -> Result<(), ActionError> {
        let Some(outbound) = &self.outbound else {
            return Err(ActionError::Unsupported(
                "GraphQL subscriptions do not accept client messages".into(),
            ));
        };
        outbound
            .send(message.to_string())
            .await
            .map_err(|_| ActionError::Transport("socket task has stopped".into()))
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel and wait for the background task to finish its shutdown.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Starts subscriptions over a [`SocketConnector`].
pub struct SubscriptionManager {
    connector: Arc<dyn SocketConnector>,
    config: ExecutorConfig,
    next_id: AtomicU64,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SubscriptionManager {
    pub fn new(connector: Arc<dyn SocketConnector>, config: ExecutorConfig) -> Self {
        Self {
            connector,
            config,
            next_id: AtomicU64::new(1),
        }
    }

    /// Start a GraphQL subscription. The task stops when `cancel` fires.
    pub fn subscribe(
        &self,
        request: &ResolvedRequest,
        cancel: CancellationToken,
    ) -> Result<SubscriptionHandle, ActionError> {
        let Some(graphql) = request.graphql.clone() else {
            return Err(ActionError::Validation(format!(
                "data source '{}' has no subscription document",
                request.data_source_id
            )));
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        let session = Session {
            id: id.clone(),
            url: socket_url(&request.url),
            headers: request.headers.clone(),
            connector: Arc::clone(&self.connector),
            config: self.config.clone(),
            cancel: cancel.clone(),
            events: events_tx,
        };
        let protocol = request.subscription_protocol.unwrap_or_default();
        info!(
            sub_id = %id,
            url = %session.url,
            protocol = protocol.header_value(),
            "starting subscription"
        );
        let task = tokio::spawn(run_graphql(session, protocol, graphql));

        Ok(SubscriptionHandle {
            id,
            events: events_rx,
            outbound: None,
            cancel,
            task: Some(task),
        })
    }

    /// Open a raw WebSocket. Incoming frames are parsed as JSON when
    /// possible and delivered as strings otherwise.
    pub fn open_socket(
        &self,
        request: &ResolvedRequest,
        cancel: CancellationToken,
    ) -> Result<SubscriptionHandle, ActionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (outbound_tx, outbound_rx) = mpsc::channel(EVENT_BUFFER);

        let session = Session {
            id: id.clone(),
            url: socket_url(&request.url),
            headers: request.headers.clone(),
            connector: Arc::clone(&self.connector),
            config: self.config.clone(),
            cancel: cancel.clone(),
            events: events_tx,
        };
        info!(sub_id = %id, url = %session.url, "opening socket");
        let task = tokio::spawn(run_raw(session, outbound_rx));

        Ok(SubscriptionHandle {
            id,
            events: events_rx,
            outbound: Some(outbound_tx),
            cancel,
            task: Some(task),
        })
    }
}

struct Session {
    id: String,
    url: String,
    headers: BTreeMap<String, String>,
    connector: Arc<dyn SocketConnector>,
    config: ExecutorConfig,
    cancel: CancellationToken,
    events: mpsc::Sender<Event>,
}

/// Why one connection ended.
enum Ended {
    /// Cancelled, completed, or nobody is listening any more.
    Finished,
    /// The connection failed or dropped and may be retried.
    Dropped(ActionError),
}

impl Session {
    async fn connect(&self, protocol: Option<&str>) -> Result<Box<dyn SocketChannel>, Ended> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Ended::Finished),
            result = self.connector.connect(&self.url, protocol, &self.headers) => {
                result.map_err(Ended::Dropped)
            }
        }
    }

    async fn emit(&self, event: Event) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Wait before reconnect number `attempt`. Returns `false` when the
    /// session should stop instead.
    async fn backoff(&self, attempt: u32, err: &ActionError) -> bool {
        if self.config.max_reconnects.is_some_and(|max| attempt >= max) {
            warn!(sub_id = %self.id, attempts = attempt, error = %err, "giving up on socket");
            let _ = self.events.send(Err(err.clone())).await;
            return false;
        }
        let delay = self.config.reconnect_delay(attempt);
        warn!(
            sub_id = %self.id,
            attempt,
            error = %err,
            delay_ms = %delay.as_millis(),
            "socket dropped, reconnecting"
        );
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            () = self.events.closed() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}

async fn run_graphql(session: Session, protocol: SubscriptionProtocol, graphql: GraphqlRequest) {
    let mut attempt = 0;
    loop {
        match graphql_connection(&session, protocol, &graphql, &mut attempt).await {
            Ended::Finished => break,
            Ended::Dropped(err) => {
                if !session.backoff(attempt, &err).await {
                    break;
                }
                attempt += 1;
            }
        }
    }
    debug!(sub_id = %session.id, "subscription task finished");
}

async fn graphql_connection(
    session: &Session,
    protocol: SubscriptionProtocol,
    graphql: &GraphqlRequest,
    attempt: &mut u32,
) -> Ended {
    let mut channel = match session.connect(Some(protocol.header_value())).await {
        Ok(channel) => channel,
        Err(ended) => return ended,
    };

    let ended = graphql_exchange(session, protocol, graphql, channel.as_mut(), attempt).await;
    channel.close().await;
    ended
}

async fn graphql_exchange(
    session: &Session,
    protocol: SubscriptionProtocol,
    graphql: &GraphqlRequest,
    channel: &mut dyn SocketChannel,
    attempt: &mut u32,
) -> Ended {
    let init = json!({"type": "connection_init", "payload": init_payload(&session.headers)});
    if let Err(e) = channel.send(init.to_string()).await {
        return Ended::Dropped(e);
    }

    let acked = tokio::select! {
        biased;
        () = session.cancel.cancelled() => return Ended::Finished,
        acked = tokio::time::timeout(session.config.ack_timeout, await_ack(channel)) => acked,
    };
    match acked {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Ended::Dropped(e),
        Err(_) => return Ended::Dropped(ActionError::Timeout(session.config.ack_timeout)),
    }
    *attempt = 0;
    debug!(sub_id = %session.id, "connection acknowledged");

    let start = json!({
        "id": session.id,
        "type": protocol.start_message(),
        "payload": graphql.wire_body(),
    });
    if let Err(e) = channel.send(start.to_string()).await {
        return Ended::Dropped(e);
    }

    loop {
        let frame = tokio::select! {
            biased;
            () = session.cancel.cancelled() => {
                stop(session, protocol, channel).await;
                return Ended::Finished;
            }
            () = session.events.closed() => {
                stop(session, protocol, channel).await;
                return Ended::Finished;
            }
            frame = channel.recv() => frame,
        };

        let text = match frame {
            None => return Ended::Dropped(ActionError::Transport("socket closed by server".into())),
            Some(Err(e)) => return Ended::Dropped(e),
            Some(Ok(text)) => text,
        };
        let Ok(message) = serde_json::from_str::<Value>(&text) else {
            warn!(sub_id = %session.id, "ignoring non-JSON frame");
            continue;
        };
        let kind = message.get("type").and_then(Value::as_str).unwrap_or_default();
        let for_us = message
            .get("id")
            .and_then(Value::as_str)
            .is_none_or(|id| id == session.id);

        match kind {
            "ping" => {
                if let Err(e) = channel.send(json!({"type": "pong"}).to_string()).await {
                    return Ended::Dropped(e);
                }
            }
            "connection_error" => {
                return Ended::Dropped(ActionError::Transport(format!(
                    "connection error: {}",
                    message.get("payload").unwrap_or(&Value::Null)
                )));
            }
            "complete" if for_us => return Ended::Finished,
            "error" if for_us => {
                let _ = session
                    .emit(Err(ActionError::GraphQl(error_text(message.get("payload")))))
                    .await;
                return Ended::Finished;
            }
            t if t == protocol.data_message() && for_us => {
                let payload = message.get("payload").cloned().unwrap_or(Value::Null);
                let event = match payload.get("data") {
                    Some(data) if !data.is_null() => Ok(data.clone()),
                    _ => match payload.get("errors") {
                        Some(errors) => Err(ActionError::GraphQl(error_text(Some(errors)))),
                        None => Ok(Value::Null),
                    },
                };
                if !session.emit(event).await {
                    stop(session, protocol, channel).await;
                    return Ended::Finished;
                }
            }
            _ => {}
        }
    }
}

async fn await_ack(channel: &mut dyn SocketChannel) -> Result<(), ActionError> {
    loop {
        let text = match channel.recv().await {
            None => return Err(ActionError::Transport("socket closed before ack".into())),
            Some(frame) => frame?,
        };
        let Ok(message) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        match message.get("type").and_then(Value::as_str) {
            Some("connection_ack") => return Ok(()),
            Some("connection_error") => {
                return Err(ActionError::Transport(format!(
                    "connection rejected: {}",
                    message.get("payload").unwrap_or(&Value::Null)
                )));
            }
            Some("ping") => channel.send(json!({"type": "pong"}).to_string()).await?,
            _ => {}
        }
    }
}

async fn stop(session: &Session, protocol: SubscriptionProtocol, channel: &mut dyn SocketChannel) {
    let stop = json!({"id": session.id, "type": protocol.stop_message()});
    if let Err(e) = channel.send(stop.to_string()).await {
        debug!(sub_id = %session.id, error = %e, "could not send stop message");
    }
    if protocol != SubscriptionProtocol::GraphqlTransportWs {
        let _ = channel
            .send(json!({"type": "connection_terminate"}).to_string())
            .await;
    }
    info!(sub_id = %session.id, "subscription stopped");
}

/// `connection_init` payload: the resolved auth header, if any.
fn init_payload(headers: &BTreeMap<String, String>) -> Value {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("authorization"))
        .map_or_else(|| json!({}), |(_, v)| json!({"Authorization": v}))
}

fn error_text(payload: Option<&Value>) -> String {
    match payload {
        Some(Value::Array(errors)) => errors
            .iter()
            .map(|e| error_text(Some(e)))
            .collect::<Vec<_>>()
            .join("; "),
        Some(Value::Object(map)) => map
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| Value::Object(map.clone()).to_string(), str::to_owned),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "subscription error".to_owned(),
    }
}

async fn run_raw(session: Session, mut outbound: mpsc::Receiver<String>) {
    let mut attempt = 0;
    loop {
        let mut channel = match session.connect(None).await {
            Ok(channel) => channel,
            Err(Ended::Finished) => break,
            Err(Ended::Dropped(err)) => {
                if !session.backoff(attempt, &err).await {
                    break;
                }
                attempt += 1;
                continue;
            }
        };
        attempt = 0;

        let ended = raw_exchange(&session, channel.as_mut(), &mut outbound).await;
        channel.close().await;
        match ended {
            Ended::Finished => break,
            Ended::Dropped(err) => {
                if !session.backoff(attempt, &err).await {
                    break;
                }
                attempt += 1;
            }
        }
    }
    debug!(sub_id = %session.id, "socket task finished");
}

async fn raw_exchange(
    session: &Session,
    channel: &mut dyn SocketChannel,
    outbound: &mut mpsc::Receiver<String>,
) -> Ended {
    loop {
        tokio::select! {
            biased;
            () = session.cancel.cancelled() => return Ended::Finished,
            () = session.events.closed() => return Ended::Finished,
            Some(text) = outbound.recv() => {
                if let Err(e) = channel.send(text).await {
                    return Ended::Dropped(e);
                }
            }
            frame = channel.recv() => match frame {
                None => {
                    let closed = ActionError::Transport("socket closed by server".into());
                    return Ended::Dropped(closed);
                }
                Some(Err(e)) => return Ended::Dropped(e),
                Some(Ok(text)) => {
                    let value = serde_json::from_str(&text).unwrap_or(Value::String(text));
                    if !session.emit(Ok(value)).await {
                        return Ended::Finished;
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

    use weft_core::{GraphqlOperation, HttpMethod};

    use super::*;

    /// Server side of an in-memory socket.
    struct Server {
        url: String,
        protocol: Option<String>,
        to_client: UnboundedSender<String>,
        from_client: UnboundedReceiver<String>,
    }

    impl Server {
        async fn expect(&mut self, kind: &str) -> Value {
            let text = self.from_client.recv().await.expect("client message");
            let value: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(value["type"], kind, "unexpected message {value}");
            value
        }

        fn push(&self, value: &Value) {
            self.to_client.send(value.to_string()).unwrap();
        }
    }

    struct Pipe {
        incoming: UnboundedReceiver<String>,
        outgoing: UnboundedSender<String>,
    }

    #[async_trait]
    impl SocketChannel for Pipe {
        async fn send(&mut self, text: String) -> Result<(), ActionError> {
            self.outgoing
                .send(text)
                .map_err(|_| ActionError::Transport("peer gone".into()))
        }
        async fn recv(&mut self) -> Option<Result<String, ActionError>> {
            self.incoming.recv().await.map(Ok)
        }
        async fn close(&mut self) {}
    }

    struct PipeConnector {
        servers: UnboundedSender<Server>,
    }

    #[async_trait]
    impl SocketConnector for PipeConnector {
        async fn connect(
            &self,
            url: &str,
            protocol: Option<&str>,
            _headers: &BTreeMap<String, String>,
        ) -> Result<Box<dyn SocketChannel>, ActionError> {
            let (to_client, incoming) = unbounded_channel();
            let (outgoing, from_client) = unbounded_channel();
            self.servers
                .send(Server {
                    url: url.to_owned(),
                    protocol: protocol.map(str::to_owned),
                    to_client,
                    from_client,
                })
                .map_err(|_| ActionError::Transport("refused".into()))?;
            Ok(Box::new(Pipe { incoming, outgoing }))
        }
    }

    fn manager(config: ExecutorConfig) -> (SubscriptionManager, UnboundedReceiver<Server>) {
        let (servers, accepted) = unbounded_channel();
        (
            SubscriptionManager::new(Arc::new(PipeConnector { servers }), config),
            accepted,
        )
    }

    fn subscription(protocol: SubscriptionProtocol) -> ResolvedRequest {
        let mut request =
            ResolvedRequest::new("ticks", HttpMethod::Graphql, "https://api.example.com/graphql");
        request.graphql = Some(GraphqlRequest {
            operation: GraphqlOperation::Subscription,
            query: "subscription { tick }".into(),
            variables: json!({}),
        });
        request.subscription_protocol = Some(protocol);
        request.set_header("Authorization", "Bearer t0k");
        request
    }

    #[tokio::test]
    async fn transport_ws_handshake_and_stream() {
        let (manager, mut accepted) = manager(ExecutorConfig::default());
        let mut handle = manager
            .subscribe(
                &subscription(SubscriptionProtocol::GraphqlTransportWs),
                CancellationToken::new(),
            )
            .unwrap();

        let mut server = accepted.recv().await.unwrap();
        assert_eq!(server.url, "wss://api.example.com/graphql");
        assert_eq!(server.protocol.as_deref(), Some("graphql-transport-ws"));

        let init = server.expect("connection_init").await;
        assert_eq!(init["payload"]["Authorization"], "Bearer t0k");
        server.push(&json!({"type": "connection_ack"}));

        let start = server.expect("subscribe").await;
        assert_eq!(start["payload"]["query"], "subscription { tick }");
        let id = start["id"].as_str().unwrap().to_owned();
        assert_eq!(id, handle.id());

        server.push(&json!({"id": id, "type": "next", "payload": {"data": {"tick": 1}}}));
        server.push(&json!({"id": id, "type": "next", "payload": {"data": {"tick": 2}}}));
        assert_eq!(handle.next().await.unwrap().unwrap(), json!({"tick": 1}));
        assert_eq!(handle.next().await.unwrap().unwrap(), json!({"tick": 2}));

        server.push(&json!({"id": id, "type": "complete"}));
        assert!(handle.next().await.is_none());
    }

    #[tokio::test]
    async fn legacy_protocol_uses_start_and_data() {
        let (manager, mut accepted) = manager(ExecutorConfig::default());
        let mut handle = manager
            .subscribe(&subscription(SubscriptionProtocol::GraphqlWs), CancellationToken::new())
            .unwrap();

        let mut server = accepted.recv().await.unwrap();
        assert_eq!(server.protocol.as_deref(), Some("graphql-ws"));
        server.expect("connection_init").await;
        server.push(&json!({"type": "connection_ack"}));
        server.push(&json!({"type": "ka"}));
        let start = server.expect("start").await;
        server.push(&json!({"id": start["id"], "type": "data", "payload": {"data": {"tick": 7}}}));
        assert_eq!(handle.next().await.unwrap().unwrap(), json!({"tick": 7}));
    }

    #[tokio::test]
    async fn server_error_is_delivered_and_ends_stream() {
        let (manager, mut accepted) = manager(ExecutorConfig::default());
        let mut handle = manager
            .subscribe(
                &subscription(SubscriptionProtocol::GraphqlTransportWs),
                CancellationToken::new(),
            )
            .unwrap();
        let mut server = accepted.recv().await.unwrap();
        server.expect("connection_init").await;
        server.push(&json!({"type": "connection_ack"}));
        let start = server.expect("subscribe").await;
        server.push(&json!({
            "id": start["id"],
            "type": "error",
            "payload": [{"message": "forbidden"}]
        }));

        assert_eq!(
            handle.next().await.unwrap().unwrap_err(),
            ActionError::GraphQl("forbidden".into())
        );
        assert!(handle.next().await.is_none());
    }

    #[tokio::test]
    async fn reconnects_after_the_socket_drops() {
        tokio::time::pause();
        let (manager, mut accepted) = manager(ExecutorConfig::default());
        let mut handle = manager
            .subscribe(
                &subscription(SubscriptionProtocol::GraphqlTransportWs),
                CancellationToken::new(),
            )
            .unwrap();

        let mut first = accepted.recv().await.unwrap();
        first.expect("connection_init").await;
        first.push(&json!({"type": "connection_ack"}));
        first.expect("subscribe").await;
        drop(first);

        let mut second = accepted.recv().await.unwrap();
        second.expect("connection_init").await;
        second.push(&json!({"type": "connection_ack"}));
        let start = second.expect("subscribe").await;
        second.push(&json!({"id": start["id"], "type": "next", "payload": {"data": {"tick": 3}}}));
        assert_eq!(handle.next().await.unwrap().unwrap(), json!({"tick": 3}));
    }

    #[tokio::test]
    async fn gives_up_after_max_reconnects() {
        tokio::time::pause();
        let config = ExecutorConfig {
            max_reconnects: Some(1),
            ack_timeout: Duration::from_secs(1),
            ..ExecutorConfig::default()
        };
        let (manager, mut accepted) = manager(config);
        let mut handle = manager
            .subscribe(
                &subscription(SubscriptionProtocol::GraphqlTransportWs),
                CancellationToken::new(),
            )
            .unwrap();

        // Neither server acknowledges.
        let _first = accepted.recv().await.unwrap();
        let _second = accepted.recv().await.unwrap();

        let err = handle.next().await.unwrap().unwrap_err();
        assert_eq!(err, ActionError::Timeout(Duration::from_secs(1)));
        assert!(handle.next().await.is_none());
    }

    #[tokio::test]
    async fn cancelling_sends_stop() {
        let (manager, mut accepted) = manager(ExecutorConfig::default());
        let cancel = CancellationToken::new();
        let handle = manager
            .subscribe(&subscription(SubscriptionProtocol::GraphqlTransportWs), cancel.clone())
            .unwrap();
        let mut server = accepted.recv().await.unwrap();
        server.expect("connection_init").await;
        server.push(&json!({"type": "connection_ack"}));
        let start = server.expect("subscribe").await;

        handle.close().await;
        assert!(cancel.is_cancelled());
        let stop = server.expect("complete").await;
        assert_eq!(stop["id"], start["id"]);
    }

    #[tokio::test]
    async fn raw_socket_round_trip() {
        let (manager, mut accepted) = manager(ExecutorConfig::default());
        let request =
            ResolvedRequest::new("chat", HttpMethod::Websocket, "wss://chat.example.com/room");
        let mut handle = manager.open_socket(&request, CancellationToken::new()).unwrap();
        let mut server = accepted.recv().await.unwrap();
        assert_eq!(server.protocol, None);

        handle.send(&json!({"say": "hi"})).await.unwrap();
        assert_eq!(server.from_client.recv().await.unwrap(), r#"{"say":"hi"}"#);

        server.to_client.send("plain text".into()).unwrap();
        server.push(&json!({"from": "bob"}));
        assert_eq!(handle.next().await.unwrap().unwrap(), json!("plain text"));
        assert_eq!(handle.next().await.unwrap().unwrap(), json!({"from": "bob"}));
    }
}
