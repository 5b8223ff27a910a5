//! Injected message transports.
//!
//! The engine never constructs a socket itself: it is given a [`Connector`] at
//! construction time and asks it for a fresh [`Transport`] on every connection
//! attempt. Distinct engines in one process can therefore use distinct
//! transports.
//!
//! - [`websocket::WebSocketConnector`]: the network transport
//! - [`channel::channel_transport`]: an in-process transport over tokio channels

pub mod channel;
pub mod websocket;

pub use channel::{channel_transport, ChannelConnector, ChannelListener, ServerSession};
pub use websocket::WebSocketConnector;

use crate::Result;
use url::Url;

/// Everything a connector needs to open one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: Url,
    /// Header name/value pairs in the order they should be sent.
    pub headers: Vec<(String, String)>,
}

impl ConnectRequest {
    /// Look up a header value, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Look up a query parameter of the URL.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

/// Opens transports.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection. An error is reported as a non-fatal transport error
    /// and handled like a close.
    async fn connect(&self, request: ConnectRequest) -> Result<Box<dyn Transport>>;
}

/// One open, message-oriented connection.
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<()>;

    /// Receive the next text frame.
    ///
    /// `None` means the connection is closed; `Some(Err(_))` is a non-fatal
    /// error. Must be cancel-safe: the engine polls it inside `select!`.
    async fn recv(&mut self) -> Option<Result<String>>;

    /// Send a keepalive ping.
    async fn ping(&mut self) -> Result<()> {
        Ok(())
    }

    /// Begin closing. Completion is signalled by `recv` returning `None`.
    async fn close(&mut self) -> Result<()>;
}
