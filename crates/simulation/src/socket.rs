//! In-memory sockets driven by the test acting as the server.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use weft_core::ActionError;
use weft_executor::{SocketChannel, SocketConnector};

/// [`SocketConnector`] that hands the server end of each connection to the
/// test through [`accept`](Self::accept).
#[derive(Debug)]
pub struct ScriptedConnector {
    accepted_tx: UnboundedSender<ScriptedServer>,
    accepted_rx: AsyncMutex<UnboundedReceiver<ScriptedServer>>,
    refuse: AtomicUsize,
    attempts: AtomicUsize,
}

impl Default for ScriptedConnector {
    fn default() -> Self {
        let (accepted_tx, accepted_rx) = unbounded_channel();
        Self {
            accepted_tx,
            accepted_rx: AsyncMutex::new(accepted_rx),
            refuse: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(&self, n: usize) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    /// Connection attempts so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the next accepted connection.
    ///
    /// # Panics
    ///
    /// Panics if the connector has been dropped.
    pub async fn accept(&self) -> ScriptedServer {
        self.accepted_rx
            .lock()
            .await
            .recv()
            .await
            .expect("connector dropped")
    }
}

#[async_trait]
impl SocketConnector for ScriptedConnector {
    async fn connect(
        &self,
        url: &str,
        protocol: Option<&str>,
        headers: &BTreeMap<String, String>,
    ) -> Result<Box<dyn SocketChannel>, ActionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ActionError::Transport(format!("connection to {url} refused")));
        }

        let (to_client, incoming) = unbounded_channel();
        let (outgoing, from_client) = unbounded_channel();
        let server = ScriptedServer {
            url: url.to_owned(),
            protocol: protocol.map(str::to_owned),
            headers: headers.clone(),
            to_client,
            from_client,
        };
        self.accepted_tx
            .send(server)
            .map_err(|_| ActionError::Transport("connector closed".into()))?;
        Ok(Box::new(ScriptedSocket { incoming, outgoing }))
    }
}

/// Client end of a scripted connection.
#[derive(Debug)]
pub struct ScriptedSocket {
    incoming: UnboundedReceiver<String>,
    outgoing: UnboundedSender<String>,
}

#[async_trait]
impl SocketChannel for ScriptedSocket {
    async fn send(&mut self, text: String) -> Result<(), ActionError> {
        self.outgoing
            .send(text)
            .map_err(|_| ActionError::Transport("server closed the connection".into()))
    }

    async fn recv(&mut self) -> Option<Result<String, ActionError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.incoming.close();
    }
}

/// Server end of a scripted connection. Dropping it closes the socket.
#[derive(Debug)]
pub struct ScriptedServer {
    pub url: String,
    pub protocol: Option<String>,
    pub headers: BTreeMap<String, String>,
    to_client: UnboundedSender<String>,
    from_client: UnboundedReceiver<String>,
}

impl ScriptedServer {
    /// Next client frame as JSON, `None` once the client is gone.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.from_client.recv().await?;
        Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    /// Next client frame, asserting its `type`.
    ///
    /// # Panics
    ///
    /// Panics if the client is gone or sent another message type.
    pub async fn expect(&mut self, kind: &str) -> Value {
        let message = self.recv_json().await.expect("client closed the socket");
        assert_eq!(message["type"], kind, "unexpected client message {message}");
        message
    }

    pub fn push(&self, message: &Value) {
        let _ = self.to_client.send(message.to_string());
    }

    pub fn push_text(&self, text: &str) {
        let _ = self.to_client.send(text.to_owned());
    }

    /// Accept `connection_init`, acknowledge it, and return the start
    /// message that follows.
    ///
    /// # Panics
    ///
    /// Panics if the client deviates from the handshake.
    pub async fn handshake(&mut self) -> Value {
        self.expect("connection_init").await;
        self.push(&json!({"type": "connection_ack"}));
        let start = self.recv_json().await.expect("client closed after ack");
        assert!(
            start["type"] == "subscribe" || start["type"] == "start",
            "expected a start message, got {start}"
        );
        start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pipes_frames_both_ways() {
        let connector = ScriptedConnector::new();
        let mut socket = connector
            .connect("wss://x", Some("graphql-ws"), &BTreeMap::new())
            .await
            .unwrap();
        let mut server = connector.accept().await;
        assert_eq!(server.protocol.as_deref(), Some("graphql-ws"));

        socket.send(r#"{"type":"ping"}"#.into()).await.unwrap();
        assert_eq!(server.expect("ping").await["type"], "ping");

        server.push(&json!({"type": "pong"}));
        assert_eq!(socket.recv().await.unwrap().unwrap(), r#"{"type":"pong"}"#);

        drop(server);
        assert!(socket.recv().await.is_none());
    }

    #[tokio::test]
    async fn refuses_on_request() {
        let connector = ScriptedConnector::new();
        connector.refuse_next(1);
        assert!(connector.connect("wss://x", None, &BTreeMap::new()).await.is_err());
        assert!(connector.connect("wss://x", None, &BTreeMap::new()).await.is_ok());
        assert_eq!(connector.attempts(), 2);
    }
}
