//! Publication registry.
//!
//! A publication is a named data feed: a fetch function that produces the
//! full dataset for a subscription, plus the set of change topics it reacts
//! to. Publications are registered up front and never removed.
//!
//! # Example
//!
//! ```ignore
//! engine.publish(
//!     "tasks.sync",
//!     fetch_fn(|tenant_id, _user, params| {
//!         let (tenant_id, params) = (tenant_id.to_string(), params.clone());
//!         async move { task_service.fetch(&tenant_id, &params).await }
//!     }),
//!     ["TASK_DATA"],
//!     PublicationOptions::default(),
//! )?;
//! ```

mod registry;

pub use registry::{
    fetch_fn, FetchFn, FetchFuture, InitFn, Publication, PublicationOptions, PublicationRegistry,
};
