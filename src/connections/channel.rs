//! Channel-backed connection.

use crate::types::{ConnectionId, SyncMessage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::connection::{AckSender, Acknowledgement, Connection, DisconnectHandler};

/// A message waiting to be written to the client, with its ack handle.
#[derive(Debug)]
pub struct Delivery {
    pub message: SyncMessage,
    pub ack: AckSender,
}

/// A [`Connection`] that forwards every message to an unbounded channel.
///
/// The host drains the receiver, writes each message to the real socket and
/// calls `ack` when the client confirms. When the socket closes, the host
/// calls [`disconnect`](ChannelConnection::disconnect).
pub struct ChannelConnection {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<Delivery>,
    handlers: Mutex<Vec<DisconnectHandler>>,
    disconnected: AtomicBool,
}

impl ChannelConnection {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Delivery>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let connection = Arc::new(Self {
            id: ConnectionId::new(),
            sender,
            handlers: Mutex::new(Vec::new()),
            disconnected: AtomicBool::new(false),
        });
        (connection, receiver)
    }

    pub fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }

    /// Mark the connection lost and run the disconnect handlers. Idempotent.
    pub fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        let handlers = std::mem::take(&mut *self.handlers.lock());
        for handler in handlers {
            handler();
        }
    }
}

impl Connection for ChannelConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, message: SyncMessage) -> Acknowledgement {
        if !self.is_connected() {
            return Acknowledgement::lost();
        }
        let (ack, acknowledgement) = Acknowledgement::channel();
        // A closed receiver drops the delivery, which fails the wait.
        let _ = self.sender.send(Delivery { message, ack });
        acknowledgement
    }

    fn on_disconnect(&self, handler: DisconnectHandler) {
        {
            let mut handlers = self.handlers.lock();
            if self.is_connected() {
                handlers.push(handler);
                return;
            }
        }
        handler();
    }
}
