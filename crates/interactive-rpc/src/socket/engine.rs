//! The task that owns the transport, the pending queue and the state machine.
//!
//! All mutation happens here, one event at a time: a command from a
//! [`Socket`](super::Socket) handle, a connection attempt completing, an
//! inbound frame, the reconnect timer, the keepalive timer or a reply timeout.
//! Each event is fully handled before the next is polled, so a reply, a
//! timeout, a cancel and a close racing for the same packet are resolved in
//! arrival order and exactly one of them wins.

use super::options::{SocketOptions, SocketOptionsPatch};
use super::packet::{Packet, PacketState, PendingEntry, PendingQueue};
use super::state::ConnectionState;
use crate::transport::{Connector, Transport};
use crate::wire::{self, Frame, Method, Reply};
use crate::{Result, SocketError};
use futures::future::{AbortHandle, Abortable, BoxFuture};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

/// Requests from socket handles.
pub(crate) enum Command {
    Connect,
    Close,
    Send {
        packet: Packet,
        reply_tx: oneshot::Sender<Result<Value>>,
    },
    Cancel {
        id: u32,
    },
    Reply(Reply),
    SetOptions {
        patch: SocketOptionsPatch,
        result_tx: oneshot::Sender<Result<()>>,
    },
    QueueSize {
        result_tx: oneshot::Sender<usize>,
    },
    Shutdown,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Connect => f.write_str("Connect"),
            Command::Close => f.write_str("Close"),
            Command::Send { packet, .. } => write!(f, "Send({})", packet.id()),
            Command::Cancel { id } => write!(f, "Cancel({})", id),
            Command::Reply(reply) => write!(f, "Reply({})", reply.id),
            Command::SetOptions { .. } => f.write_str("SetOptions"),
            Command::QueueSize { .. } => f.write_str("QueueSize"),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Channels the engine publishes on.
pub(crate) struct EngineChannels {
    pub state_tx: watch::Sender<ConnectionState>,
    pub inbound_tx: mpsc::UnboundedSender<Method>,
    pub sent_tx: broadcast::Sender<Frame>,
    pub errors_tx: broadcast::Sender<SocketError>,
}

type Connecting = BoxFuture<'static, Result<Box<dyn Transport>>>;
/// Resolves to `None` once the packet it guards is resolved or requeued.
type Expiry = BoxFuture<'static, Option<(u32, u64, Duration)>>;

enum Event {
    Command(Option<Command>),
    Opened(Result<Box<dyn Transport>>),
    Frame(Option<Result<String>>),
    ReconnectDue,
    PingDue,
    Expired(Option<(u32, u64, Duration)>),
}

pub(crate) struct Engine {
    options: SocketOptions,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    channels: EngineChannels,
    queue: PendingQueue,
    transport: Option<Box<dyn Transport>>,
    connecting: Option<Connecting>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    ping_timer: Option<Interval>,
    expiries: FuturesUnordered<Expiry>,
    next_seq: u32,
    next_generation: u64,
}

impl Engine {
    pub fn new(
        options: SocketOptions,
        connector: Arc<dyn Connector>,
        commands: mpsc::UnboundedReceiver<Command>,
        channels: EngineChannels,
    ) -> Self {
        Self {
            options,
            connector,
            commands,
            channels,
            queue: PendingQueue::default(),
            transport: None,
            connecting: None,
            reconnect_timer: None,
            ping_timer: None,
            expiries: FuturesUnordered::new(),
            next_seq: 0,
            next_generation: 0,
        }
    }

    pub async fn run(mut self) {
        loop {
            let event = tokio::select! {
                command = self.commands.recv() => Event::Command(command),
                opened = wait_connecting(&mut self.connecting), if self.connecting.is_some() => {
                    Event::Opened(opened)
                }
                frame = recv_frame(&mut self.transport), if self.transport.is_some() => {
                    Event::Frame(frame)
                }
                _ = wait_sleep(&mut self.reconnect_timer), if self.reconnect_timer.is_some() => {
                    Event::ReconnectDue
                }
                _ = wait_tick(&mut self.ping_timer), if self.ping_timer.is_some() => Event::PingDue,
                Some(expired) = self.expiries.next(), if !self.expiries.is_empty() => {
                    Event::Expired(expired)
                }
            };

            match event {
                Event::Command(None) | Event::Command(Some(Command::Shutdown)) => {
                    self.shutdown().await;
                    return;
                }
                Event::Command(Some(command)) => self.handle_command(command).await,
                Event::Opened(result) => self.on_opened(result).await,
                Event::Frame(None) => self.on_closed(),
                Event::Frame(Some(Err(e))) => self.on_transport_error(e),
                Event::Frame(Some(Ok(text))) => self.on_text(&text),
                Event::ReconnectDue => {
                    self.reconnect_timer = None;
                    self.connect();
                }
                Event::PingDue => self.ping().await,
                Event::Expired(Some((id, generation, timeout))) => {
                    self.on_expired(id, generation, timeout)
                }
                Event::Expired(None) => {}
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::Close => self.close().await,
            Command::Send { packet, reply_tx } => self.enqueue(packet, reply_tx).await,
            Command::Cancel { id } => self.cancel(id),
            Command::Reply(reply) => self.send_reply(reply).await,
            Command::SetOptions { patch, result_tx } => {
                let result = self.options.apply(patch);
                if let Err(e) = &result {
                    debug!("Rejected option update: {}", e);
                }
                let _ = result_tx.send(result);
            }
            Command::QueueSize { result_tx } => {
                let _ = result_tx.send(self.queue.len());
            }
            Command::Shutdown => {}
        }
    }

    fn state(&self) -> ConnectionState {
        *self.channels.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.channels.state_tx.send_replace(state);
        if previous != state {
            debug!("Socket state {} -> {}", previous, state);
        }
    }

    fn report(&self, error: SocketError) {
        let _ = self.channels.errors_tx.send(error);
    }

    fn connect(&mut self) {
        match self.state() {
            ConnectionState::Closing => {
                self.set_state(ConnectionState::Refreshing);
                return;
            }
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::Refreshing => {
                debug!("Ignoring connect while {}", self.state());
                return;
            }
            ConnectionState::Reconnecting => self.reconnect_timer = None,
            ConnectionState::Idle => {}
        }

        let request = match self.options.connect_request() {
            Ok(request) => request,
            Err(e) => {
                warn!("Cannot connect: {}", e);
                self.report(e);
                return;
            }
        };

        info!("Connecting to {}", request.url);
        let connector = self.connector.clone();
        self.connecting = Some(Box::pin(async move { connector.connect(request).await }));
        self.set_state(ConnectionState::Connecting);
    }

    async fn on_opened(&mut self, result: Result<Box<dyn Transport>>) {
        self.connecting = None;
        let transport = match result {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Connection attempt failed: {}", e);
                self.report(e);
                self.on_closed();
                return;
            }
        };

        info!("Connected to {}", self.options.url);
        self.transport = Some(transport);
        self.options.reconnection_policy.reset();
        self.next_seq = 0;
        self.ping_timer = keepalive(self.options.ping_interval);
        self.set_state(ConnectionState::Connected);

        for id in self.queue.pending_ids() {
            self.transmit(id).await;
        }
    }

    /// Handle the end of a transport or of a failed attempt to open one.
    fn on_closed(&mut self) {
        self.transport = None;
        self.connecting = None;
        self.ping_timer = None;

        let restart_timers = !self.options.timeout_while_queued;
        let mut requeued = 0;
        for entry in self.queue.iter_mut() {
            if entry.packet.requeue() {
                requeued += 1;
                if restart_timers {
                    self.next_generation += 1;
                    entry.generation = self.next_generation;
                    entry.cancel_expiry();
                }
            }
        }
        if requeued > 0 {
            debug!("Requeued {} in-flight packet(s)", requeued);
        }

        match self.state() {
            ConnectionState::Refreshing => {
                self.set_state(ConnectionState::Idle);
                self.connect();
            }
            ConnectionState::Closing | ConnectionState::Idle => {
                info!("Connection closed");
                self.set_state(ConnectionState::Idle);
            }
            _ if !self.options.auto_reconnect => {
                info!("Connection lost, auto-reconnect disabled");
                self.set_state(ConnectionState::Idle);
            }
            _ => {
                let delay = self.options.reconnection_policy.next();
                info!("Connection lost, reconnecting in {:?}", delay);
                self.reconnect_timer = Some(Box::pin(tokio::time::sleep(delay)));
                self.set_state(ConnectionState::Reconnecting);
            }
        }
    }

    fn on_transport_error(&self, error: SocketError) {
        if self.state().is_closing() {
            debug!("Ignoring transport error while closing: {}", error);
            return;
        }
        warn!("Transport error: {}", error);
        self.report(error);
    }

    fn on_text(&mut self, text: &str) {
        match wire::decode(text) {
            Ok(Frame::Reply(reply)) => self.on_reply(reply),
            Ok(Frame::Method(method)) => {
                if self.channels.inbound_tx.send(method).is_err() {
                    debug!("Dropping inbound method, no receiver");
                }
            }
            Err(e) => {
                warn!("Dropping undecodable frame: {}", e);
                self.report(e);
            }
        }
    }

    fn on_reply(&mut self, reply: Reply) {
        let Some(mut entry) = self.queue.remove(reply.id) else {
            debug!("Ignoring reply for unknown packet {}", reply.id);
            return;
        };
        entry.packet.set_state(PacketState::Replied);
        entry.finish(reply.into_result().map_err(SocketError::Protocol));
    }

    fn on_expired(&mut self, id: u32, generation: u64, timeout: Duration) {
        let applies = self.queue.get(id).is_some_and(|entry| {
            entry.generation == generation
                && (self.options.timeout_while_queued
                    || entry.packet.state() == PacketState::Sending)
        });
        if !applies {
            return;
        }
        if let Some(entry) = self.queue.remove(id) {
            debug!("Packet {} timed out after {:?}", id, timeout);
            entry.finish(Err(SocketError::Timeout(timeout)));
        }
    }

    async fn enqueue(&mut self, packet: Packet, reply_tx: oneshot::Sender<Result<Value>>) {
        let id = packet.id();
        if self.queue.contains(id) {
            let _ = reply_tx.send(Err(SocketError::config(format!(
                "packet id {} is already pending",
                id
            ))));
            return;
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let timeout = packet.timeout().unwrap_or(self.options.reply_timeout);
        self.queue.push(PendingEntry::new(packet, generation, reply_tx));

        if self.options.timeout_while_queued {
            self.arm_expiry(id, generation, timeout);
        }
        if self.state().is_connected() {
            self.transmit(id).await;
        }
    }

    async fn transmit(&mut self, id: u32) {
        let Some(entry) = self.queue.get_mut(id) else {
            return;
        };
        self.next_seq = self.next_seq.wrapping_add(1);
        let frame = entry.packet.stamp(self.next_seq);

        let text = match wire::encode(&frame) {
            Ok(text) => text,
            Err(e) => {
                if let Some(entry) = self.queue.remove(id) {
                    entry.finish(Err(e));
                }
                return;
            }
        };

        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        if let Err(e) = transport.send(text).await {
            // The packet stays pending; the close that follows decides what next.
            warn!("Failed to send packet {}: {}", id, e);
            self.report(e);
            return;
        }
        let _ = self.channels.sent_tx.send(frame);

        let Some(entry) = self.queue.get_mut(id) else {
            return;
        };
        entry.packet.set_state(PacketState::Sending);

        if entry.packet.method().discard {
            if let Some(entry) = self.queue.remove(id) {
                entry.finish(Ok(Value::Null));
            }
            return;
        }

        if !self.options.timeout_while_queued {
            let generation = entry.generation;
            let timeout = entry.packet.timeout().unwrap_or(self.options.reply_timeout);
            self.arm_expiry(id, generation, timeout);
        }
    }

    fn arm_expiry(&mut self, id: u32, generation: u64, timeout: Duration) {
        let Some(entry) = self.queue.get_mut(id) else {
            return;
        };
        let (handle, registration) = AbortHandle::new_pair();
        entry.set_expiry(handle);

        let timer = Abortable::new(
            async move {
                tokio::time::sleep(timeout).await;
                (id, generation, timeout)
            },
            registration,
        );
        self.expiries.push(timer.map(|outcome| outcome.ok()).boxed());
    }

    fn cancel(&mut self, id: u32) {
        match self.queue.remove(id) {
            Some(mut entry) => {
                debug!("Cancelling packet {}", id);
                entry.packet.set_state(PacketState::Cancelled);
                entry.finish(Err(SocketError::Cancelled));
            }
            None => debug!("Cancel for unknown packet {}", id),
        }
    }

    fn cancel_all(&mut self) {
        let count = self.queue.len();
        for mut entry in self.queue.drain() {
            entry.packet.set_state(PacketState::Cancelled);
            entry.finish(Err(SocketError::Cancelled));
        }
        if count > 0 {
            debug!("Cancelled {} pending packet(s)", count);
        }
    }

    async fn close(&mut self) {
        match self.state() {
            ConnectionState::Reconnecting => {
                self.reconnect_timer = None;
                self.set_state(ConnectionState::Idle);
                return;
            }
            ConnectionState::Idle => {
                self.cancel_all();
                return;
            }
            ConnectionState::Closing => return,
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::Refreshing => {}
        }

        self.set_state(ConnectionState::Closing);
        self.cancel_all();
        self.ping_timer = None;

        match self.transport.as_mut() {
            Some(transport) => {
                // The transport reports completion by ending its stream.
                if let Err(e) = transport.close().await {
                    debug!("Ignoring error while closing: {}", e);
                }
            }
            None => self.on_closed(),
        }
    }

    async fn send_reply(&mut self, reply: Reply) {
        if !self.state().is_connected() {
            debug!("Dropping reply {} while not connected", reply.id);
            return;
        }
        let frame = Frame::Reply(reply);
        let text = match wire::encode(&frame) {
            Ok(text) => text,
            Err(e) => {
                self.report(e);
                return;
            }
        };
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        match transport.send(text).await {
            Ok(()) => {
                let _ = self.channels.sent_tx.send(frame);
            }
            Err(e) => {
                warn!("Failed to send reply {}: {}", frame.id(), e);
                self.report(e);
            }
        }
    }

    async fn ping(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            if let Err(e) = transport.ping().await {
                warn!("Keepalive ping failed: {}", e);
                self.report(e);
            }
        }
    }

    async fn shutdown(&mut self) {
        debug!("Socket engine shutting down");
        self.cancel_all();
        self.reconnect_timer = None;
        self.connecting = None;
        if let Some(mut transport) = self.transport.take() {
            let _ = transport.close().await;
        }
        self.set_state(ConnectionState::Idle);
    }
}

fn keepalive(interval: Duration) -> Option<Interval> {
    if interval.is_zero() {
        return None;
    }
    let mut timer = tokio::time::interval_at(Instant::now() + interval, interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(timer)
}

async fn wait_connecting(connecting: &mut Option<Connecting>) -> Result<Box<dyn Transport>> {
    match connecting {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn recv_frame(transport: &mut Option<Box<dyn Transport>>) -> Option<Result<String>> {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_sleep(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn wait_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
