//! High-level client combining the socket, the method dispatcher and clock
//! synchronisation.

use crate::clock::{ClockSync, ClockSyncOptions};
use crate::config::ClockSyncConfig;
use crate::dispatch::MethodDispatcher;
use crate::socket::{ConnectionState, InboundMethods, PendingCall, Socket, SocketOptions};
use crate::transport::Connector;
use crate::wire::{Method, Reply};
use crate::{Result, SocketError};
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A connected participant in an interactive session.
///
/// Inbound methods are routed through [`Client::dispatcher`]; handler replies
/// and error replies for unhandled methods are sent back automatically.
#[derive(Debug)]
pub struct Client {
    socket: Arc<Socket>,
    dispatcher: Arc<MethodDispatcher>,
    clock: ClockSync,
    dispatch_task: JoinHandle<()>,
}

impl Client {
    pub fn new(options: SocketOptions, connector: impl Connector) -> Result<Self> {
        Self::with_clock_options(options, connector, ClockSyncOptions::default())
    }

    pub fn with_clock_options(
        options: SocketOptions,
        connector: impl Connector,
        clock_options: ClockSyncOptions,
    ) -> Result<Self> {
        let (socket, inbound) = Socket::new(options, connector)?;
        let socket = Arc::new(socket);
        let dispatcher = Arc::new(MethodDispatcher::new());

        let dispatch_task = tokio::spawn(dispatch_loop(
            inbound,
            dispatcher.clone(),
            Arc::downgrade(&socket),
        ));

        Ok(Self {
            socket,
            dispatcher,
            clock: ClockSync::new(clock_options),
            dispatch_task,
        })
    }

    /// Connect and wait until the connection is open.
    ///
    /// With auto-reconnect enabled this keeps waiting through failed attempts.
    pub async fn open(&self) -> Result<()> {
        self.socket.connect();
        if self.socket.wait_for_state(ConnectionState::Connected).await {
            Ok(())
        } else {
            Err(SocketError::TransportClosed)
        }
    }

    /// Close the connection and stop clock synchronisation.
    pub fn close(&mut self) {
        self.clock.stop();
        self.socket.close();
    }

    pub fn execute(&self, method: impl Into<String>, params: Value, discard: bool) -> PendingCall {
        self.socket.execute(method, params, discard)
    }

    /// Ask the server for its clock, in milliseconds since the Unix epoch.
    pub async fn get_time(&self) -> Result<i64> {
        server_time(self.execute(ClockSyncConfig::GET_TIME_METHOD, json!({}), false)).await
    }

    /// Start sampling the server clock in the background.
    pub fn synchronize_time(&mut self) {
        let socket = Arc::downgrade(&self.socket);
        info!("Starting clock synchronisation");
        self.clock.start(move || {
            let call = socket
                .upgrade()
                .map(|s| s.execute(ClockSyncConfig::GET_TIME_METHOD, json!({}), false));
            async move {
                match call {
                    Some(call) => server_time(call).await,
                    None => Err(SocketError::TransportClosed),
                }
            }
        });
    }

    /// Median offset of the server clock from the local clock, in milliseconds.
    pub fn time_delta(&self) -> i64 {
        self.clock.delta()
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn dispatcher(&self) -> &Arc<MethodDispatcher> {
        &self.dispatcher
    }

    pub fn clock(&self) -> &ClockSync {
        &self.clock
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.dispatch_task.abort();
    }
}

async fn server_time(call: PendingCall) -> Result<i64> {
    let result = call.await?;
    result
        .get("time")
        .and_then(Value::as_i64)
        .ok_or_else(|| SocketError::Decode {
            message: format!("getTime reply has no numeric time: {}", result),
        })
}

async fn dispatch_loop(
    mut inbound: InboundMethods,
    dispatcher: Arc<MethodDispatcher>,
    socket: Weak<Socket>,
) {
    while let Some(method) = inbound.recv().await {
        let Some(reply) = dispatch_one(&dispatcher, method).await else {
            continue;
        };
        match socket.upgrade() {
            Some(socket) => socket.reply(reply),
            None => break,
        }
    }
    debug!("Method dispatch loop finished");
}

async fn dispatch_one(dispatcher: &MethodDispatcher, method: Method) -> Option<Reply> {
    let id = method.id;
    let discard = method.discard;
    let name = method.method.clone();

    match dispatcher.handle(method).await {
        Ok(reply) => reply,
        Err(e) if discard => {
            debug!("Dropping error for discarded method {}: {}", name, e);
            None
        }
        Err(e) => {
            warn!("Failed to handle method {}: {}", name, e);
            Some(Reply::err(id, e.to_rpc_error()))
        }
    }
}
