//! The subscription entity and its emission protocol.

use crate::connections::Connection;
use crate::engine::SyncEngine;
use crate::error::{Result, SyncError};
use crate::publications::Publication;
use crate::types::{
    ConnectionId, Owner, Params, Revision, SubscriptionId, SyncMessage, SyncRecord, User,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::queue::DeltaQueue;

/// Progress of the initial full fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FetchState {
    Pending,
    Loaded,
    Failed,
}

/// Mutable part of a subscription.
struct SubscriptionState {
    queue: DeltaQueue,
    /// High-water revision of everything emitted so far.
    revision: Option<Revision>,
    connection: Option<Arc<dyn Connection>>,
    /// Bumped whenever the bound connection changes; an emit loop only
    /// drives the binding it was started for.
    binding: u64,
    fetch: FetchState,
    /// The full dataset has been loaded but not yet acknowledged.
    initial_batch_pending: bool,
    initial_push_completed: bool,
    /// An emit loop for the current binding is running.
    emitting: bool,
    released: bool,
}

/// A batch handed to the connection, kept until acknowledged.
struct Batch {
    connection: Arc<dyn Connection>,
    records: Vec<SyncRecord>,
    initial: bool,
}

/// One client's live registration against a publication.
pub struct Subscription {
    id: SubscriptionId,
    owner: Owner,
    user: User,
    publication: Arc<Publication>,
    params: Params,
    additional_params: Params,
    state: Mutex<SubscriptionState>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        owner: Owner,
        user: User,
        publication: Arc<Publication>,
        params: Params,
        additional_params: Params,
        revision_history: usize,
    ) -> Self {
        Self {
            id,
            owner,
            user,
            publication,
            params,
            additional_params,
            state: Mutex::new(SubscriptionState {
                queue: DeltaQueue::with_history(revision_history),
                revision: None,
                connection: None,
                binding: 0,
                fetch: FetchState::Pending,
                initial_batch_pending: false,
                initial_push_completed: false,
                emitting: false,
                released: false,
            }),
        }
    }

    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn publication(&self) -> &Arc<Publication> {
        &self.publication
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Server-side params derived by the publication initializer.
    pub fn additional_params(&self) -> &Params {
        &self.additional_params
    }

    /// High-water revision of everything emitted so far.
    pub fn revision(&self) -> Option<Revision> {
        self.state.lock().revision.clone()
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_bound(&self) -> bool {
        self.state.lock().connection.is_some()
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.state.lock().connection.as_ref().map(|c| c.id())
    }

    pub fn is_initial_push_completed(&self) -> bool {
        self.state.lock().initial_push_completed
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    /// Whether a changed record concerns this subscription.
    ///
    /// Every client param and every server-side param must equal the
    /// record's value. A param named `fooId` is read from `record.foo.id`
    /// when the record embeds a `foo` object, else from `record.fooId`.
    pub fn matches(&self, record: &SyncRecord) -> bool {
        includes(&self.params, record) && includes(&self.additional_params, record)
    }

    // --- Binding ---

    /// Point the subscription at a connection. Returns the previously bound
    /// connection when it differs from the new one.
    pub(crate) fn attach(&self, connection: Arc<dyn Connection>) -> Option<ConnectionId> {
        let mut state = self.state.lock();
        let previous = state.connection.as_ref().map(|c| c.id());
        if previous == Some(connection.id()) {
            return None;
        }
        state.connection = Some(connection);
        state.binding += 1;
        state.emitting = false;
        previous
    }

    /// Clear the connection if it is still `connection_id`.
    pub(crate) fn detach_from(&self, connection_id: ConnectionId) -> bool {
        let mut state = self.state.lock();
        let bound_here = state
            .connection
            .as_ref()
            .map(|c| c.id() == connection_id)
            .unwrap_or(false);
        if bound_here {
            state.connection = None;
            state.binding += 1;
            state.emitting = false;
        }
        bound_here
    }

    pub(crate) fn mark_released(&self) {
        let mut state = self.state.lock();
        state.released = true;
        state.connection = None;
        state.binding += 1;
        state.emitting = false;
    }

    // --- Emission ---

    /// Switch a failed initial fetch back to pending. Returns true if the
    /// caller should run the fetch again.
    pub(crate) fn retry_fetch(&self) -> bool {
        let mut state = self.state.lock();
        if state.fetch != FetchState::Failed || state.released {
            return false;
        }
        state.fetch = FetchState::Pending;
        true
    }

    /// Fetch the full dataset and emit it as the initial, non-diff batch.
    ///
    /// A failing fetch is logged and leaves the subscription without an
    /// initial push; nothing retries it automatically.
    pub(crate) async fn fetch_and_emit_all(self: Arc<Self>, engine: SyncEngine) {
        {
            let mut state = self.state.lock();
            state.fetch = FetchState::Pending;
            state.initial_push_completed = false;
        }
        engine.log_sub(&self, "Fetching data now");

        let fetched = self
            .publication
            .fetch(&self.owner.tenant_id, &self.user, &self.params)
            .await
            .map_err(|source| SyncError::Fetch {
                publication: self.publication.name().to_string(),
                source,
            })
            .and_then(normalize_fetched);

        let records = match fetched {
            Ok(records) => records,
            Err(err) => {
                tracing::error!(
                    subscription_id = %self.id,
                    publication = %self.publication.name(),
                    user = %self.user.display_name(),
                    error = %err,
                    "unrecoverable error fetching publication data"
                );
                self.state.lock().fetch = FetchState::Failed;
                return;
            }
        };

        {
            let mut state = self.state.lock();
            if state.released {
                return;
            }
            for record in records {
                state.queue.merge(record);
            }
            state.fetch = FetchState::Loaded;
            state.initial_batch_pending = true;
        }
        self.flush(&engine);
    }

    /// Queue a changed record, emitting right away if the client is idle.
    pub(crate) fn emit_change(self: &Arc<Self>, engine: &SyncEngine, record: SyncRecord) {
        let ready = {
            let mut state = self.state.lock();
            if state.released {
                return;
            }
            state.queue.merge(record);
            state.initial_push_completed
        };
        if ready {
            self.flush(engine);
        }
    }

    /// Start emitting the queue unless an emission is already in flight.
    ///
    /// Does nothing while the initial fetch is outstanding, when there is
    /// nothing to send, or while unbound (delivery resumes on rebinding).
    pub(crate) fn flush(self: &Arc<Self>, engine: &SyncEngine) {
        let Some(runtime) = engine.runtime() else {
            tracing::error!(subscription_id = %self.id, "no Tokio runtime to emit on");
            return;
        };

        let binding = {
            let mut state = self.state.lock();
            if state.released || state.emitting || state.fetch != FetchState::Loaded {
                return;
            }
            if state.queue.is_empty() && !state.initial_batch_pending {
                None
            } else if state.connection.is_none() {
                Some(Err(()))
            } else {
                state.emitting = true;
                Some(Ok(state.binding))
            }
        };

        match binding {
            None => engine.log_sub(self, "No data in the queue to emit"),
            Some(Err(())) => engine.log_sub(
                self,
                "Emit canceled. Subscription no longer bound and pending destruction.",
            ),
            Some(Ok(binding)) => {
                runtime.spawn(Arc::clone(self).emit_loop(engine.clone(), binding));
            }
        }
    }

    /// Send the queue, wait for the client's acknowledgement, dequeue what
    /// it covered, and repeat until the queue is empty.
    async fn emit_loop(self: Arc<Self>, engine: SyncEngine, binding: u64) {
        loop {
            let batch = match self.next_batch(binding) {
                Some(batch) => batch,
                None => return,
            };

            engine.log_sub(&self, &format!("Emitting queue: {}", batch.records.len()));
            let message = SyncMessage {
                name: self.publication.name().to_string(),
                subscription_id: self.id.clone(),
                records: batch.records.iter().map(|r| r.value().clone()).collect(),
                params: self.params.clone(),
                diff: !batch.initial,
            };

            if batch.connection.send(message).await.is_err() {
                let mut state = self.state.lock();
                if state.binding == binding {
                    state.emitting = false;
                }
                drop(state);
                engine.log_sub(&self, "Acknowledgement lost, emission stopped");
                return;
            }

            let release = {
                let mut state = self.state.lock();
                state.queue.acknowledge(&batch.records);
                if batch.initial {
                    state.initial_batch_pending = false;
                }
                state.initial_push_completed = true;
                self.publication.is_once() && !state.released
            };
            if release {
                engine.release(&self);
                return;
            }
        }
    }

    /// Take the next batch for `binding`, or end the loop.
    fn next_batch(&self, binding: u64) -> Option<Batch> {
        let mut state = self.state.lock();
        if state.released || state.binding != binding {
            return None;
        }
        let connection = match state.connection.clone() {
            Some(connection) if !state.queue.is_empty() || state.initial_batch_pending => {
                connection
            }
            _ => {
                state.emitting = false;
                return None;
            }
        };

        let records = state.queue.snapshot();
        let queued_max = state.queue.max_revision().cloned();
        if let Some(max) = queued_max {
            if state.revision.as_ref().map(|r| &max > r).unwrap_or(true) {
                state.revision = Some(max);
            }
        }
        Some(Batch {
            connection,
            records,
            initial: state.initial_batch_pending,
        })
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("publication", &self.publication.name())
            .field("owner", &self.owner)
            .field("params", &self.params)
            .finish()
    }
}

/// A fetch result is a record, an array of records, or null.
fn normalize_fetched(result: Value) -> Result<Vec<SyncRecord>> {
    match result {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.into_iter().map(SyncRecord::from_fetched).collect(),
        single => Ok(vec![SyncRecord::from_fetched(single)?]),
    }
}

fn includes(params: &Params, record: &SyncRecord) -> bool {
    params.iter().all(|(name, expected)| {
        param_value(record, name)
            .map(|actual| same_value(actual, expected))
            .unwrap_or(false)
    })
}

// Numbers compare by value, so `5` equals `5.0`.
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

// `opportunityId` may live on the record as `opportunity.id`.
fn param_value<'a>(record: &'a SyncRecord, param: &str) -> Option<&'a Value> {
    if let Some(at) = param.find("Id") {
        if let Some(nested) = record.field(&param[..at]).filter(|v| v.is_object()) {
            return nested.get("id");
        }
    }
    record.field(param)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publications::{fetch_fn, PublicationOptions, PublicationRegistry};
    use crate::subscriptions::DEFAULT_REVISION_HISTORY;
    use serde_json::json;

    fn subscription(params: Value, additional: Value) -> Subscription {
        let registry = PublicationRegistry::new();
        let publication = registry
            .register(
                "magazines",
                fetch_fn(|_, _, _| async { Ok(Value::Null) }),
                ["MAGAZINE"],
                PublicationOptions::default(),
            )
            .unwrap();
        let user = User::new("u1", "t1");
        Subscription::new(
            SubscriptionId::generate(),
            user.owner().unwrap(),
            user,
            publication,
            params.as_object().cloned().unwrap_or_default(),
            additional.as_object().cloned().unwrap_or_default(),
            DEFAULT_REVISION_HISTORY,
        )
    }

    fn record(value: Value) -> SyncRecord {
        SyncRecord::from_value(value).unwrap()
    }

    #[test]
    fn test_empty_params_match_everything() {
        let sub = subscription(json!({}), json!({}));
        assert!(sub.matches(&record(json!({"id": 1, "revision": 0}))));
    }

    #[test]
    fn test_param_mismatch() {
        let sub = subscription(json!({"type": "fiction"}), json!({}));
        assert!(sub.matches(&record(json!({"id": 1, "revision": 0, "type": "fiction"}))));
        assert!(!sub.matches(&record(json!({"id": 2, "revision": 0, "type": "business"}))));
        assert!(!sub.matches(&record(json!({"id": 3, "revision": 0}))));
    }

    #[test]
    fn test_nested_id_shorthand() {
        let sub = subscription(json!({"opportunityId": 5}), json!({}));
        assert!(sub.matches(&record(
            json!({"id": 1, "revision": 0, "opportunity": {"id": 5, "name": "x"}})
        )));
        assert!(sub.matches(&record(json!({"id": 1, "revision": 0, "opportunityId": 5}))));
        assert!(!sub.matches(&record(
            json!({"id": 1, "revision": 0, "opportunity": {"id": 6}, "opportunityId": 5})
        )));
    }

    #[test]
    fn test_nested_path_requires_embedded_object() {
        let sub = subscription(json!({"opportunityId": 5}), json!({}));
        for placeholder in [json!(false), json!(0), json!(""), json!(null)] {
            assert!(sub.matches(&record(json!({
                "id": 1,
                "revision": 0,
                "opportunity": placeholder,
                "opportunityId": 5
            }))));
        }
    }

    #[test]
    fn test_numbers_match_by_value() {
        let sub = subscription(json!({"planId": 5, "score": 1.5}), json!({}));
        assert!(sub.matches(&record(
            json!({"id": 1, "revision": 0, "planId": 5.0, "score": 1.5})
        )));
        assert!(!sub.matches(&record(
            json!({"id": 1, "revision": 0, "planId": "5", "score": 1.5})
        )));
    }

    #[test]
    fn test_additional_params_also_filter() {
        let sub = subscription(json!({"planId": 5}), json!({"status": "active"}));
        assert!(sub.matches(&record(
            json!({"id": 1, "revision": 0, "planId": 5, "status": "active"})
        )));
        assert!(!sub.matches(&record(
            json!({"id": 1, "revision": 0, "planId": 5, "status": "closed"})
        )));
    }

    #[test]
    fn test_normalize_fetched_shapes() {
        assert!(normalize_fetched(Value::Null).unwrap().is_empty());
        assert_eq!(normalize_fetched(json!({"id": 1})).unwrap().len(), 1);
        assert_eq!(
            normalize_fetched(json!([{"id": 1}, {"id": 2, "revision": 3}]))
                .unwrap()
                .len(),
            2
        );
        assert!(matches!(
            normalize_fetched(json!([{"name": "no id"}])),
            Err(SyncError::DataContract(_))
        ));
    }

    #[test]
    fn test_retry_fetch_only_after_failure() {
        let sub = subscription(json!({}), json!({}));
        assert!(!sub.retry_fetch());
        sub.state.lock().fetch = FetchState::Failed;
        assert!(sub.retry_fetch());
        assert!(!sub.retry_fetch());
    }
}
