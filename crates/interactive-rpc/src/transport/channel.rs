//! In-process transport over tokio channels.
//!
//! [`channel_transport`] returns a connector for the engine and a listener for
//! the other side. Every successful `connect` hands the listener a
//! [`ServerSession`] that can read what the client sent, write frames back and
//! close the connection, which is how the engine's reconnection behaviour is
//! exercised without a network.

use super::{ConnectRequest, Connector, Transport};
use crate::wire::{self, Frame};
use crate::{Result, SocketError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Create a connected connector/listener pair.
pub fn channel_transport() -> (ChannelConnector, ChannelListener) {
    let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();
    let connector = ChannelConnector {
        sessions: sessions_tx,
        refusing: Arc::new(AtomicBool::new(false)),
        attempts: Arc::new(AtomicUsize::new(0)),
    };
    (connector, ChannelListener { sessions: sessions_rx })
}

/// Client half: opens in-process connections.
#[derive(Debug, Clone)]
pub struct ChannelConnector {
    sessions: mpsc::UnboundedSender<ServerSession>,
    refusing: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

impl ChannelConnector {
    /// Make subsequent connection attempts fail until switched back.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of connection attempts made so far, including refused ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<Box<dyn Transport>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.refusing.load(Ordering::SeqCst) {
            debug!("Channel connection attempt {} refused", attempt);
            return Err(SocketError::transport("connection refused"));
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();

        let session = ServerSession {
            request,
            outgoing: Some(to_client),
            incoming: from_client,
        };
        self.sessions
            .send(session)
            .map_err(|_| SocketError::transport("listener dropped"))?;

        Ok(Box::new(ChannelTransport {
            outgoing: Some(to_server),
            incoming: from_server,
            closed: false,
        }))
    }
}

/// Server half: yields one session per accepted connection.
#[derive(Debug)]
pub struct ChannelListener {
    sessions: mpsc::UnboundedReceiver<ServerSession>,
}

impl ChannelListener {
    /// Wait for the next connection.
    pub async fn accept(&mut self) -> Option<ServerSession> {
        self.sessions.recv().await
    }
}

/// The server's view of one in-process connection.
#[derive(Debug)]
pub struct ServerSession {
    /// URL and headers the client connected with.
    pub request: ConnectRequest,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    incoming: mpsc::UnboundedReceiver<String>,
}

impl ServerSession {
    /// Next raw text frame from the client, `None` once the client closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.recv().await
    }

    /// Next decoded frame from the client.
    pub async fn recv_frame(&mut self) -> Option<Result<Frame>> {
        self.recv().await.map(|text| wire::decode(&text))
    }

    /// Send raw text to the client.
    pub fn send(&self, text: impl Into<String>) -> Result<()> {
        self.outgoing
            .as_ref()
            .ok_or(SocketError::TransportClosed)?
            .send(text.into())
            .map_err(|_| SocketError::TransportClosed)
    }

    /// Encode and send a frame to the client.
    pub fn send_frame(&self, frame: impl Into<Frame>) -> Result<()> {
        self.send(wire::encode(&frame.into())?)
    }

    /// Close the connection from the server side.
    pub fn close(&mut self) {
        self.outgoing = None;
    }

    pub fn is_open(&self) -> bool {
        self.outgoing.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

struct ChannelTransport {
    outgoing: Option<mpsc::UnboundedSender<String>>,
    incoming: mpsc::UnboundedReceiver<String>,
    closed: bool,
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.outgoing
            .as_ref()
            .ok_or(SocketError::TransportClosed)?
            .send(text)
            .map_err(|_| SocketError::transport("peer closed the connection"))
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        if self.closed {
            return None;
        }
        match self.incoming.recv().await {
            Some(text) => Some(Ok(text)),
            None => {
                self.closed = true;
                None
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.outgoing = None;
        self.closed = true;
        Ok(())
    }
}
