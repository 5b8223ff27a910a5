//! Outbound packets and the pending queue.

use crate::wire::{Frame, Method};
use crate::Result;
use futures::future::AbortHandle;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::oneshot;

/// Lifecycle of an outbound packet.
///
/// `Sending` may fall back to `Pending` when the transport closes before a
/// reply; `Replied` and `Cancelled` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketState {
    Pending,
    Sending,
    Replied,
    Cancelled,
}

impl PacketState {
    pub fn is_final(&self) -> bool {
        matches!(self, PacketState::Replied | PacketState::Cancelled)
    }
}

/// Outbound wrapper tracking a [`Method`]'s send/reply lifecycle.
#[derive(Debug, Clone)]
pub struct Packet {
    method: Method,
    state: PacketState,
    timeout: Option<Duration>,
}

impl Packet {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            state: PacketState::Pending,
            timeout: None,
        }
    }

    /// Override the socket's default reply timeout for this packet.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> u32 {
        self.method.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn state(&self) -> PacketState {
        self.state
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Stamp the transmission sequence number and return the frame to send.
    pub(crate) fn stamp(&mut self, seq: u32) -> Frame {
        self.method.seq = Some(seq);
        Frame::Method(self.method.clone())
    }

    /// Move to `state` unless the packet already reached a final state.
    pub(crate) fn set_state(&mut self, state: PacketState) -> bool {
        if self.state.is_final() {
            return false;
        }
        self.state = state;
        true
    }

    /// Return an in-flight packet to the queue after its transport closed.
    pub(crate) fn requeue(&mut self) -> bool {
        if self.state != PacketState::Sending {
            return false;
        }
        self.state = PacketState::Pending;
        self.method.seq = None;
        true
    }
}

/// A queued packet plus the channel its caller is waiting on.
#[derive(Debug)]
pub(crate) struct PendingEntry {
    pub packet: Packet,
    /// Bumped whenever earlier timers for this packet must be ignored.
    pub generation: u64,
    reply_tx: Option<oneshot::Sender<Result<Value>>>,
    expiry: Option<AbortHandle>,
}

impl PendingEntry {
    pub fn new(packet: Packet, generation: u64, reply_tx: oneshot::Sender<Result<Value>>) -> Self {
        Self {
            packet,
            generation,
            reply_tx: Some(reply_tx),
            expiry: None,
        }
    }

    /// Attach the reply timer, aborting any earlier one.
    pub fn set_expiry(&mut self, handle: AbortHandle) {
        if let Some(previous) = self.expiry.replace(handle) {
            previous.abort();
        }
    }

    pub fn cancel_expiry(&mut self) {
        if let Some(handle) = self.expiry.take() {
            handle.abort();
        }
    }

    /// Deliver the final outcome to the caller. A dropped caller is ignored.
    pub fn finish(mut self, result: Result<Value>) {
        if let Some(tx) = self.reply_tx.take() {
            let _ = tx.send(result);
        }
    }
}

impl Drop for PendingEntry {
    fn drop(&mut self) {
        self.cancel_expiry();
    }
}

/// Packets created by `execute()` and not yet resolved, in enqueue order.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    entries: VecDeque<PendingEntry>,
}

impl PendingQueue {
    pub fn push(&mut self, entry: PendingEntry) {
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: u32) -> Option<&PendingEntry> {
        self.entries.iter().find(|e| e.packet.id() == id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut PendingEntry> {
        self.entries.iter_mut().find(|e| e.packet.id() == id)
    }

    /// Remove a packet. Returns `None` if it was already removed.
    pub fn remove(&mut self, id: u32) -> Option<PendingEntry> {
        let index = self.entries.iter().position(|e| e.packet.id() == id)?;
        self.entries.remove(index)
    }

    /// Ids of packets waiting to be sent, in queue order.
    pub fn pending_ids(&self) -> Vec<u32> {
        self.entries
            .iter()
            .filter(|e| e.packet.state() == PacketState::Pending)
            .map(|e| e.packet.id())
            .collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PendingEntry> {
        self.entries.iter_mut()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = PendingEntry> + '_ {
        self.entries.drain(..)
    }
}
