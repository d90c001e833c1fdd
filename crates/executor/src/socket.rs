use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use weft_core::ActionError;

/// An open, text-framed WebSocket connection.
#[async_trait]
pub trait SocketChannel: Send {
    async fn send(&mut self, text: String) -> Result<(), ActionError>;

    /// Next text frame. `None` once the peer has closed the connection.
    async fn recv(&mut self) -> Option<Result<String, ActionError>>;

    async fn close(&mut self);
}

/// Opens [`SocketChannel`]s.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        protocol: Option<&str>,
        headers: &BTreeMap<String, String>,
    ) -> Result<Box<dyn SocketChannel>, ActionError>;
}

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`SocketConnector`] backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl SocketConnector for TungsteniteConnector {
    async fn connect(
        &self,
        url: &str,
        protocol: Option<&str>,
        headers: &BTreeMap<String, String>,
    ) -> Result<Box<dyn SocketChannel>, ActionError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| ActionError::Validation(format!("invalid socket url '{url}': {e}")))?;

        for (name, value) in headers {
            if name.eq_ignore_ascii_case("content-type") {
                continue;
            }
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ActionError::Validation(format!("header '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ActionError::Validation(format!("header '{name}': {e}")))?;
            request.headers_mut().insert(name, value);
        }
        if let Some(protocol) = protocol {
            let value = HeaderValue::from_str(protocol)
                .map_err(|e| ActionError::Validation(format!("sub-protocol '{protocol}': {e}")))?;
            request.headers_mut().insert("Sec-WebSocket-Protocol", value);
        }

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| ActionError::Transport(format!("websocket connect to {url}: {e}")))?;
        debug!(url, status = response.status().as_u16(), "websocket connected");

        let (sink, stream) = stream.split();
        Ok(Box::new(TungsteniteChannel { sink, stream }))
    }
}

struct TungsteniteChannel {
    sink: SplitSink<Stream, Message>,
    stream: SplitStream<Stream>,
}

#[async_trait]
impl SocketChannel for TungsteniteChannel {
    async fn send(&mut self, text: String) -> Result<(), ActionError> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| ActionError::Transport(format!("websocket send: {e}")))
    }

    async fn recv(&mut self) -> Option<Result<String, ActionError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "websocket closed by peer");
                    return None;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => {
                    return Some(Err(ActionError::Transport(format!("websocket receive: {e}"))));
                }
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}

/// Rewrite an HTTP(S) endpoint to its WebSocket scheme.
pub(crate) fn socket_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_owned()
    }
}
