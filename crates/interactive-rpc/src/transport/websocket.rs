//! WebSocket transport built on `tokio-tungstenite`.

use super::{ConnectRequest, Connector, Transport};
use crate::config::SocketConfig;
use crate::{Result, SocketError};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector that opens a WebSocket per connection attempt.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    connect_timeout: Option<Duration>,
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail connection attempts that take longer than `timeout`.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<Box<dyn Transport>> {
        let mut ws_request = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SocketError::transport(format!("invalid WebSocket request: {}", e)))?;

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SocketError::config(format!("invalid header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SocketError::config(format!("invalid header value: {}", e)))?;
            ws_request.headers_mut().insert(name, value);
        }

        debug!("Opening WebSocket to {}", request.url);
        let connecting = tokio_tungstenite::connect_async(ws_request);
        let result = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connecting)
                .await
                .map_err(|_| SocketError::transport(format!("connection timeout ({:?})", timeout)))?,
            None => connecting.await,
        };

        let (stream, response) = result.map_err(|e| match e {
            WsError::Http(response) => {
                SocketError::transport(format!("WebSocket HTTP error: {}", response.status()))
            }
            other => SocketError::transport(format!("connection failed: {}", other)),
        })?;
        debug!("WebSocket handshake completed with status {}", response.status());

        Ok(Box::new(WebSocketTransport {
            stream,
            closed: false,
        }))
    }
}

struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| SocketError::transport(format!("send failed: {}", e)))
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            if self.closed {
                return None;
            }
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                None | Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) => {
                    self.closed = true;
                    return None;
                }
                Some(Err(e)) => {
                    // tungstenite keeps failing after an I/O or protocol error
                    self.closed = true;
                    return Some(Err(SocketError::transport(e.to_string())));
                }
            };

            match message {
                Message::Text(text) => {
                    return Some(check_frame_size(text.len()).map(|()| text));
                }
                Message::Binary(data) => return Some(binary_text(&data)),
                Message::Close(frame) => {
                    debug!("WebSocket close frame received: {:?}", frame);
                    self.closed = true;
                    return None;
                }
                // tungstenite answers pings itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn ping(&mut self) -> Result<()> {
        self.stream
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| SocketError::transport(format!("ping failed: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(SocketError::transport(format!("close failed: {}", e))),
        }
    }
}

fn check_frame_size(len: usize) -> Result<()> {
    if len > SocketConfig::MAX_FRAME_SIZE {
        return Err(SocketError::Decode {
            message: format!("frame of {} bytes exceeds limit", len),
        });
    }
    Ok(())
}

/// Binary frames carry the same JSON text as text frames.
fn binary_text(data: &[u8]) -> Result<String> {
    check_frame_size(data.len())?;
    String::from_utf8(data.to_vec()).map_err(|_| SocketError::Decode {
        message: "binary frame is not UTF-8".to_string(),
    })
}
