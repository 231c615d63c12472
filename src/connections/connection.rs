//! The connection capability used by the engine.

use crate::types::{ConnectionId, SyncMessage};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::oneshot;

/// Callback run once when a connection is lost.
pub type DisconnectHandler = Box<dyn FnOnce() + Send + 'static>;

/// A bidirectional client channel.
pub trait Connection: Send + Sync {
    /// Stable identity of this connection.
    fn id(&self) -> ConnectionId;

    /// Send a message. The returned future resolves once the client has
    /// acknowledged it, or fails if the acknowledgement can no longer come.
    fn send(&self, message: SyncMessage) -> Acknowledgement;

    /// Run `handler` when the connection is lost. A handler registered on
    /// an already lost connection runs immediately.
    fn on_disconnect(&self, handler: DisconnectHandler);
}

/// The acknowledgement will never arrive.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("acknowledgement lost")]
pub struct AckLost;

/// Client side of an acknowledgement: call [`ack`](AckSender::ack) once the
/// message has been received. Dropping it without acking fails the wait.
#[derive(Debug)]
pub struct AckSender(oneshot::Sender<()>);

impl AckSender {
    pub fn ack(self) {
        let _ = self.0.send(());
    }
}

/// Pending acknowledgement of one sent message.
#[derive(Debug)]
pub struct Acknowledgement(oneshot::Receiver<()>);

impl Acknowledgement {
    /// A connected sender/acknowledgement pair.
    pub fn channel() -> (AckSender, Acknowledgement) {
        let (tx, rx) = oneshot::channel();
        (AckSender(tx), Acknowledgement(rx))
    }

    /// An acknowledgement that has already failed.
    pub fn lost() -> Self {
        let (_, ack) = Self::channel();
        ack
    }
}

impl Future for Acknowledgement {
    type Output = Result<(), AckLost>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx).map(|r| r.map_err(|_| AckLost))
    }
}
