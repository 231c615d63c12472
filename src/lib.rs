//! # Live Sync
//!
//! Server side of a push-based cache-replication protocol. Clients subscribe
//! to named publications; when the application reports that a record
//! changed, every subscription whose params match the record receives it
//! over its connection.
//!
//! ## Core Concepts
//!
//! - **Publications**: a fetch function plus the change topics it reacts to
//! - **Subscriptions**: a client's live registration, with a revision-aware
//!   delta queue emitted one acknowledged batch at a time
//! - **Connections**: subscriptions survive a dropped connection for a grace
//!   period so a reconnecting client resumes without refetching
//! - **Dispatch**: `notify_change` routes a changed record to matching
//!   subscriptions
//!
//! ## Example
//!
//! ```ignore
//! use livesync::{fetch_fn, ChannelConnection, PublicationOptions, SyncConfig, SyncEngine};
//!
//! let engine = SyncEngine::new(SyncConfig::from_env());
//! engine.publish(
//!     "magazines",
//!     fetch_fn(|_tenant_id, _user, params| {
//!         let params = params.clone();
//!         async move { Ok(magazines::fetch(&params).await?) }
//!     }),
//!     ["MAGAZINE"],
//!     PublicationOptions::default(),
//! )?;
//!
//! let (connection, deliveries) = ChannelConnection::new();
//! let id = engine.subscribe(&user, connection, None, "magazines", params)?;
//!
//! // Later, after writing to the database:
//! engine.notify_change("MAGAZINE", json!({"id": 7, "revision": 3, "type": "fiction"}))?;
//! ```

pub mod config;
pub mod connections;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod publications;
pub mod routes;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use config::SyncConfig;
pub use connections::{
    AckLost, AckSender, Acknowledgement, ChannelConnection, Connection, ConnectionBinder,
    Delivery, DisconnectHandler,
};
pub use dispatch::{ClusterNotifier, NoopClusterNotifier, NotifyOptions};
pub use engine::{SyncEngine, PROTOCOL_VERSION};
pub use error::{BoxError, Result, SyncError};
pub use publications::{
    fetch_fn, FetchFn, FetchFuture, InitFn, Publication, PublicationOptions, PublicationRegistry,
};
pub use routes::{SubscribeRequest, SyncRoutes, UnsubscribeRequest, SUBSCRIBE_ROUTE, UNSUBSCRIBE_ROUTE};
pub use subscriptions::{DeltaQueue, Subscription, SubscriptionManager, DEFAULT_REVISION_HISTORY};
pub use types::*;
