//! Shared helpers for the integration suites.
#![allow(dead_code)]

use livesync::{
    fetch_fn, Delivery, FetchFn, PublicationOptions, SyncConfig, SyncEngine, User,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

pub const GRACE_PERIOD: Duration = Duration::from_secs(20);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn test_engine() -> SyncEngine {
    init_tracing();
    SyncEngine::new(
        SyncConfig::default()
            .with_grace_period(GRACE_PERIOD)
            .with_debug(true),
    )
}

pub fn john() -> User {
    User::new("UID1234", "TID").with_display("John")
}

/// Fetch function returning `records` and counting its calls.
pub fn counting_fetch(records: Value) -> (FetchFn, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let fetch = fetch_fn(move |_, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        let records = records.clone();
        async move { Ok(records) }
    });
    (fetch, calls)
}

/// Register `name` on `topic` serving `records`; returns the fetch counter.
pub fn publish(engine: &SyncEngine, name: &str, topic: &str, records: Value) -> Arc<AtomicUsize> {
    let (fetch, calls) = counting_fetch(records);
    engine
        .publish(name, fetch, [topic], PublicationOptions::default())
        .unwrap();
    calls
}

pub fn fetch_count(calls: &AtomicUsize) -> usize {
    calls.load(Ordering::SeqCst)
}

pub fn params(value: Value) -> livesync::Params {
    value.as_object().cloned().unwrap_or_default()
}

/// Next delivery on a connection, failing the test if none comes.
pub async fn next_delivery(deliveries: &mut UnboundedReceiver<Delivery>) -> Delivery {
    tokio::time::timeout(Duration::from_secs(1), deliveries.recv())
        .await
        .expect("timed out waiting for a delivery")
        .expect("connection channel closed")
}

/// Assert nothing else is delivered.
pub async fn assert_no_delivery(deliveries: &mut UnboundedReceiver<Delivery>) {
    let next = tokio::time::timeout(Duration::from_millis(100), deliveries.recv()).await;
    if let Ok(Some(delivery)) = next {
        panic!("unexpected delivery: {:?}", delivery.message);
    }
}

/// Let spawned engine tasks run.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
