//! Interactive RPC - Reconnecting JSON-RPC socket for interactive sessions.
//!
//! This crate provides a bidirectional, request/reply RPC channel over a
//! message transport (normally a WebSocket). It queues calls while
//! disconnected, correlates replies to requests by id, retransmits in-flight
//! calls after a reconnect, routes inbound methods to registered handlers and
//! estimates the server clock offset.
//!
//! # Example
//!
//! ```rust,ignore
//! use interactive_rpc::{Client, SocketOptions, WebSocketConnector};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> interactive_rpc::Result<()> {
//!     let options = SocketOptions::new("wss://example.com/gameClient").with_jwt("token");
//!     let mut client = Client::new(options, WebSocketConnector::new())?;
//!
//!     client
//!         .dispatcher()
//!         .add_sync_handler("onReady", |m| Some(m.reply(json!(null))));
//!     client.open().await?;
//!
//!     let hello = client.execute("hello", json!({}), false).await?;
//!     println!("Server said {}", hello);
//!
//!     client.synchronize_time();
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod client;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod reconnect;
pub mod socket;
pub mod transport;
pub mod wire;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use client::Client;
pub use clock::{ClockSync, ClockSyncOptions, DeltaHistory};
pub use dispatch::{MethodDispatcher, MethodHandler};
pub use error::{Result, SocketError};
pub use reconnect::{ExponentialReconnectionPolicy, ReconnectionPolicy};
pub use socket::{
    ConnectionState, InboundMethods, Packet, PacketState, PendingCall, Socket, SocketOptions,
    SocketOptionsPatch,
};
pub use transport::{
    channel_transport, ChannelConnector, ChannelListener, ConnectRequest, Connector,
    ServerSession, Transport, WebSocketConnector,
};
pub use wire::{Frame, Method, Reply, RpcError};
