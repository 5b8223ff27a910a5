//! The reconnecting, request/reply RPC socket.
//!
//! A [`Socket`] is a cheap handle onto an engine task that owns the transport.
//! Calls made while disconnected are queued and flushed in order once the
//! connection opens; calls in flight when the connection drops are sent again
//! after it reconnects.
//!
//! ```no_run
//! # async fn demo() -> interactive_rpc::Result<()> {
//! use interactive_rpc::{ConnectionState, Socket, SocketOptions, WebSocketConnector};
//! use serde_json::json;
//!
//! let (socket, mut inbound) = Socket::new(
//!     SocketOptions::new("wss://example.com/gameClient"),
//!     WebSocketConnector::new(),
//! )?;
//! socket.connect();
//! socket.wait_for_state(ConnectionState::Connected).await;
//!
//! let result = socket.execute("hello", json!({}), false).await?;
//! # let _ = (result, inbound.recv().await);
//! # Ok(())
//! # }
//! ```

mod engine;
pub mod options;
pub mod packet;
pub mod state;

pub use options::{SocketOptions, SocketOptionsPatch};
pub use packet::{Packet, PacketState};
pub use state::ConnectionState;

use crate::config::SocketConfig;
use crate::transport::Connector;
use crate::wire::{Frame, Method, Reply};
use crate::{Result, SocketError};
use engine::{Command, Engine, EngineChannels};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::debug;

/// Handle to a socket engine.
///
/// Every method is non-blocking; the engine processes commands in the order
/// they were issued. Dropping the handle shuts the engine down and
/// cancels whatever is still queued.
#[derive(Debug)]
pub struct Socket {
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    sent_tx: broadcast::Sender<Frame>,
    errors_tx: broadcast::Sender<SocketError>,
}

impl Socket {
    /// Validate `options` and spawn the engine on the current tokio runtime.
    ///
    /// The socket starts `Idle`; call [`Socket::connect`] to open it. Inbound
    /// methods from the peer arrive on the returned [`InboundMethods`].
    pub fn new(
        options: SocketOptions,
        connector: impl Connector,
    ) -> Result<(Socket, InboundMethods)> {
        options.validate()?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (sent_tx, _) = broadcast::channel(SocketConfig::SENT_CHANNEL_CAPACITY);
        let (errors_tx, _) = broadcast::channel(SocketConfig::ERROR_CHANNEL_CAPACITY);

        let channels = EngineChannels {
            state_tx,
            inbound_tx,
            sent_tx: sent_tx.clone(),
            errors_tx: errors_tx.clone(),
        };
        debug!("Spawning socket engine for {}", options.url);
        let engine = Engine::new(options, Arc::new(connector), commands_rx, channels);
        tokio::spawn(engine.run());

        let socket = Socket {
            commands: commands_tx,
            state_rx,
            sent_tx,
            errors_tx,
        };
        Ok((socket, InboundMethods { rx: inbound_rx }))
    }

    fn command(&self, command: Command) {
        if let Err(e) = self.commands.send(command) {
            debug!("Socket engine gone, dropping {:?}", e.0);
        }
    }

    /// Open the connection. A no-op while already connecting or connected.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Close the connection and cancel every queued packet.
    pub fn close(&self) {
        self.command(Command::Close);
    }

    /// Queue a method call and return a future for its result.
    ///
    /// For `discard` methods the future resolves to `Value::Null` once the
    /// method has been written to the transport.
    pub fn execute(&self, method: impl Into<String>, params: Value, discard: bool) -> PendingCall {
        self.send(Packet::new(Method::new(method, params, discard)))
    }

    /// Queue a prepared packet, for example one with its own timeout.
    pub fn send(&self, packet: Packet) -> PendingCall {
        let id = packet.id();
        let (reply_tx, rx) = oneshot::channel();
        self.command(Command::Send { packet, reply_tx });
        PendingCall {
            id,
            rx,
            commands: self.commands.clone(),
        }
    }

    /// Cancel a queued packet. Unknown ids are ignored.
    pub fn cancel(&self, id: u32) {
        self.command(Command::Cancel { id });
    }

    /// Send a reply to an inbound method. Dropped while not connected.
    pub fn reply(&self, reply: Reply) {
        self.command(Command::Reply(reply));
    }

    /// Update the options used by subsequent connection attempts and calls.
    ///
    /// A patch that would leave the options invalid is rejected as a whole.
    pub async fn set_options(&self, patch: SocketOptionsPatch) -> Result<()> {
        let (result_tx, result_rx) = oneshot::channel();
        self.commands
            .send(Command::SetOptions { patch, result_tx })
            .map_err(|_| SocketError::TransportClosed)?;
        result_rx.await.map_err(|_| SocketError::TransportClosed)?
    }

    /// Number of packets sent or waiting to be sent that have not resolved.
    pub async fn queue_size(&self) -> usize {
        let (result_tx, result_rx) = oneshot::channel();
        if self.commands.send(Command::QueueSize { result_tx }).is_err() {
            return 0;
        }
        result_rx.await.unwrap_or(0)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver observing every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Wait until the socket reaches `target`.
    ///
    /// Returns `false` if the engine stopped first.
    pub async fn wait_for_state(&self, target: ConnectionState) -> bool {
        let mut rx = self.state_rx.clone();
        let reached = rx.wait_for(|state| *state == target).await.is_ok();
        reached
    }

    /// Every frame written to the transport, in order.
    pub fn subscribe_sent(&self) -> broadcast::Receiver<Frame> {
        self.sent_tx.subscribe()
    }

    /// Non-fatal transport and decode errors.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<SocketError> {
        self.errors_tx.subscribe()
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// Result of [`Socket::execute`].
///
/// Resolves to the reply's `result`, the peer's error as
/// [`SocketError::Protocol`], [`SocketError::Timeout`], or
/// [`SocketError::Cancelled`]. Dropping the future does not cancel the call;
/// use [`PendingCall::cancel`] for that.
#[derive(Debug)]
pub struct PendingCall {
    id: u32,
    rx: oneshot::Receiver<Result<Value>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl PendingCall {
    /// Id of the method this call is waiting on.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Cancel the call. The future then resolves to [`SocketError::Cancelled`]
    /// unless a reply won the race.
    pub fn cancel(&self) {
        let _ = self.commands.send(Command::Cancel { id: self.id });
    }
}

impl Future for PendingCall {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(SocketError::TransportClosed)))
    }
}

/// Methods sent by the peer.
#[derive(Debug)]
pub struct InboundMethods {
    rx: mpsc::UnboundedReceiver<Method>,
}

impl InboundMethods {
    /// Next inbound method. `None` once the socket has shut down.
    pub async fn recv(&mut self) -> Option<Method> {
        self.rx.recv().await
    }
}
