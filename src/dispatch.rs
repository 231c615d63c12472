//! Change dispatch: routes "a record changed" events to subscriptions.

use crate::engine::SyncEngine;
use crate::error::Result;
use crate::types::{SyncRecord, Timestamp, REMOVAL_FIELD};
use serde_json::Value;

/// Extension point for fanning changes out to other nodes.
///
/// A client reconnecting to another node resubscribes there and refetches,
/// so single-node deployments need nothing here.
pub trait ClusterNotifier: Send + Sync {
    fn notify(&self, topic: &str, record: &Value);
}

/// Cluster notifier for single-node deployments.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopClusterNotifier;

impl ClusterNotifier for NoopClusterNotifier {
    fn notify(&self, _topic: &str, _record: &Value) {}
}

/// Options for [`SyncEngine::notify_change_with`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NotifyOptions {
    /// Deliver to every subscription of the listening publications, even
    /// those whose params do not match the record.
    pub force_notify: bool,
}

impl NotifyOptions {
    pub fn force() -> Self {
        Self { force_notify: true }
    }
}

impl SyncEngine {
    /// Notify that `record` changed under `topic`.
    ///
    /// Every subscription of every publication listening to `topic` whose
    /// params match the record queues it for delivery. The record must carry
    /// an `id` and a `revision` or `timestamp`.
    pub fn notify_change(&self, topic: &str, record: Value) -> Result<()> {
        self.notify_change_with(topic, record, NotifyOptions::default())
    }

    /// [`notify_change`](Self::notify_change) with options.
    pub fn notify_change_with(
        &self,
        topic: &str,
        record: Value,
        options: NotifyOptions,
    ) -> Result<()> {
        self.inner().cluster.notify(topic, &record);

        let publications = self.inner().publications.listening_to(topic);
        if publications.is_empty() {
            return Ok(());
        }

        let record = SyncRecord::from_value(record)?;
        let mut delivered = 0usize;
        for publication in publications {
            for subscription in self
                .inner()
                .subscriptions
                .using_publication(publication.name())
            {
                if options.force_notify || subscription.matches(&record) {
                    subscription.emit_change(self, record.clone());
                    delivered += 1;
                }
            }
        }
        tracing::trace!(topic, key = %record.key(), delivered, "change dispatched");
        Ok(())
    }

    /// Notify that `record` was removed under `topic`.
    ///
    /// The record is stamped with a `remove` marker holding the removal time;
    /// clients evict it from their cache on seeing the marker. The caller is
    /// responsible for bumping the record's revision beforehand.
    pub fn notify_removal(&self, topic: &str, mut record: Value) -> Result<()> {
        if let Value::Object(fields) = &mut record {
            fields.insert(REMOVAL_FIELD.to_string(), Value::from(Timestamp::now().0));
        }
        self.notify_change(topic, record)
    }
}
