//! Revision-aware delta queue.

use crate::types::{RecordKey, Revision, SyncRecord};
use lru::LruCache;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;

/// Default number of acknowledged keys whose revision is remembered.
pub const DEFAULT_REVISION_HISTORY: usize = 10_000;

/// Pending-to-send records of one subscription, one entry per record key.
///
/// An entry is only ever replaced by a record of equal or higher revision,
/// and a record older than what the client already acknowledged for the
/// same key is refused. Acknowledged revisions are remembered for the most
/// recently delivered keys only; a stale notification for a key that fell
/// out of that history is accepted again.
#[derive(Debug)]
pub struct DeltaQueue {
    pending: BTreeMap<RecordKey, SyncRecord>,
    /// Highest acknowledged revision per key, bounded.
    delivered: LruCache<RecordKey, Revision>,
}

impl DeltaQueue {
    pub fn new() -> Self {
        Self::with_history(DEFAULT_REVISION_HISTORY)
    }

    /// Queue remembering the acknowledged revision of up to `history` keys.
    pub fn with_history(history: usize) -> Self {
        let history = NonZeroUsize::new(history).unwrap_or(NonZeroUsize::MIN);
        Self {
            pending: BTreeMap::new(),
            delivered: LruCache::new(history),
        }
    }

    /// Merge a record. Returns false if it was older than what is already
    /// queued or delivered for its key.
    pub fn merge(&mut self, record: SyncRecord) -> bool {
        if let Some(delivered) = self.delivered.peek(record.key()) {
            if record.revision() < delivered {
                return false;
            }
        }
        if let Some(previous) = self.pending.get(record.key()) {
            if record.revision() < previous.revision() {
                return false;
            }
        }
        self.pending.insert(record.key().clone(), record);
        true
    }

    /// Copy of every queued record, in key order.
    pub fn snapshot(&self) -> Vec<SyncRecord> {
        self.pending.values().cloned().collect()
    }

    /// Drop the entries covered by an acknowledged batch.
    ///
    /// An entry replaced by a newer revision after the batch was sent stays
    /// queued. Returns the number of entries removed.
    pub fn acknowledge(&mut self, sent: &[SyncRecord]) -> usize {
        let mut removed = 0;
        for record in sent {
            let covered = self
                .pending
                .get(record.key())
                .map(|queued| queued.revision() <= record.revision())
                .unwrap_or(false);
            if covered {
                self.pending.remove(record.key());
                removed += 1;
            }

            let newer = self
                .delivered
                .get(record.key())
                .map(|delivered| record.revision() > delivered)
                .unwrap_or(true);
            if newer {
                self.delivered
                    .put(record.key().clone(), record.revision().clone());
            }
        }
        removed
    }

    /// Highest revision currently queued.
    pub fn max_revision(&self) -> Option<&Revision> {
        self.pending.values().map(SyncRecord::revision).max()
    }

    /// Number of keys whose acknowledged revision is remembered.
    pub fn history_len(&self) -> usize {
        self.delivered.len()
    }

    pub fn get(&self, key: &RecordKey) -> Option<&SyncRecord> {
        self.pending.get(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for DeltaQueue {
    fn default() -> Self {
        Self::new()
    }
}
