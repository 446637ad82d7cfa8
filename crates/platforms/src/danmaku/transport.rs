//! WebSocket transport seam.
//!
//! The provider only talks to [`WsTransport`], which lets the reconnect loop be
//! driven by a scripted transport in tests while production uses tokio-tungstenite.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::http::{Request, Uri};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::danmaku::error::{DanmakuError, Result};

/// An established, bidirectional message stream.
#[async_trait]
pub trait WsTransport: Send {
    async fn send(&mut self, message: Message) -> Result<()>;

    /// Next inbound message. `None` once the peer has closed the stream.
    async fn next(&mut self) -> Option<Result<Message>>;

    async fn close(&mut self);
}

/// Opens [`WsTransport`]s.
#[async_trait]
pub trait WsConnector: Send + Sync {
    async fn connect(&self, url: &str, headers: &[(String, String)])
    -> Result<Box<dyn WsTransport>>;
}

/// Connector backed by `tokio_tungstenite::connect_async`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

struct TungsteniteTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl WsTransport for TungsteniteTransport {
    async fn send(&mut self, message: Message) -> Result<()> {
        self.stream.send(message).await?;
        Ok(())
    }

    async fn next(&mut self) -> Option<Result<Message>> {
        self.stream
            .next()
            .await
            .map(|r| r.map_err(DanmakuError::from))
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

/// Build the upgrade request with the extra headers a platform requires.
pub(crate) fn build_request(url: &str, headers: &[(String, String)]) -> Result<Request<()>> {
    let uri: Uri = url
        .parse()
        .map_err(|e| DanmakuError::connection(format!("Invalid WebSocket URL {url}: {e}")))?;
    let host = uri.host().unwrap_or("localhost");
    let host_header = match uri.port_u16() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let mut builder = Request::builder()
        .uri(url)
        .header("Host", host_header)
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header("Sec-WebSocket-Key", generate_key());

    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder
        .body(())
        .map_err(|e| DanmakuError::connection(format!("Failed to build request: {e}")))
}

#[async_trait]
impl WsConnector for TungsteniteConnector {
    async fn connect(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<Box<dyn WsTransport>> {
        let (stream, _) = if headers.is_empty() {
            connect_async(url).await?
        } else {
            connect_async(build_request(url, headers)?).await?
        };
        Ok(Box::new(TungsteniteTransport { stream }))
    }
}
