//! Subscriptions to publications.
//!
//! Each subscription owns a delta queue of records waiting to be pushed to
//! its client. Emission is acknowledgement-gated:
//! - at most one batch per subscription is in flight
//! - acknowledged entries leave the queue unless a newer revision replaced
//!   them meanwhile
//! - changes arriving during the round trip go out in the next batch
//!
//! # Example
//!
//! ```ignore
//! let (connection, mut deliveries) = ChannelConnection::new();
//! let id = engine.subscribe(&user, connection, None, "magazines", params)?;
//!
//! while let Some(delivery) = deliveries.recv().await {
//!     socket.emit(SyncMessage::EVENT, &delivery.message).await?;
//!     delivery.ack.ack();
//! }
//! ```

mod manager;
mod queue;
mod subscription;

pub use manager::SubscriptionManager;
pub use queue::{DeltaQueue, DEFAULT_REVISION_HISTORY};
pub use subscription::Subscription;
