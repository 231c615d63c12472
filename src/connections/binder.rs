//! Tracks which subscriptions are bound to which connection.

use crate::subscriptions::Subscription;
use crate::types::ConnectionId;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use super::connection::Connection;

/// Connection -> bound subscriptions.
///
/// The list is bookkeeping only: the subscription manager owns subscription
/// lifetime, and a subscription holds at most one connection at a time.
#[derive(Default)]
pub struct ConnectionBinder {
    bound: Mutex<HashMap<ConnectionId, Vec<Arc<Subscription>>>>,
}

impl ConnectionBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `subscription` to `connection`, moving it off any previous
    /// connection. Idempotent.
    ///
    /// Returns true the first time this connection is seen, in which case
    /// the caller must watch it for disconnection.
    pub(crate) fn bind(
        &self,
        subscription: &Arc<Subscription>,
        connection: &Arc<dyn Connection>,
    ) -> bool {
        let previous = subscription.attach(Arc::clone(connection));

        let mut bound = self.bound.lock();
        if let Some(previous) = previous {
            if let Some(list) = bound.get_mut(&previous) {
                list.retain(|s| !Arc::ptr_eq(s, subscription));
            }
        }
        match bound.entry(connection.id()) {
            Entry::Vacant(entry) => {
                entry.insert(vec![Arc::clone(subscription)]);
                true
            }
            Entry::Occupied(mut entry) => {
                let list = entry.get_mut();
                if !list.iter().any(|s| Arc::ptr_eq(s, subscription)) {
                    list.push(Arc::clone(subscription));
                }
                false
            }
        }
    }

    /// Snapshot and forget the subscriptions of a lost connection.
    pub(crate) fn take(&self, connection_id: ConnectionId) -> Vec<Arc<Subscription>> {
        self.bound
            .lock()
            .remove(&connection_id)
            .unwrap_or_default()
    }

    /// Remove a subscription from its connection's list, if bound.
    pub(crate) fn unbind(&self, subscription: &Arc<Subscription>) {
        let Some(connection_id) = subscription.connection_id() else {
            return;
        };
        if let Some(list) = self.bound.lock().get_mut(&connection_id) {
            list.retain(|s| !Arc::ptr_eq(s, subscription));
        }
    }

    /// Number of subscriptions bound to a connection.
    pub fn bound_to(&self, connection_id: ConnectionId) -> usize {
        self.bound
            .lock()
            .get(&connection_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::ChannelConnection;
    use crate::publications::{fetch_fn, PublicationRegistry};
    use crate::subscriptions::DEFAULT_REVISION_HISTORY;
    use crate::types::{Params, SubscriptionId, User};
    use serde_json::Value;

    fn subscription() -> Arc<Subscription> {
        let registry = PublicationRegistry::new();
        let publication = registry
            .register(
                "magazines",
                fetch_fn(|_, _, _| async { Ok(Value::Null) }),
                ["MAGAZINE"],
                Default::default(),
            )
            .unwrap();
        let user = User::new("u1", "t1");
        Arc::new(Subscription::new(
            SubscriptionId::generate(),
            user.owner().unwrap(),
            user,
            publication,
            Params::new(),
            Params::new(),
            DEFAULT_REVISION_HISTORY,
        ))
    }

    #[test]
    fn test_first_bind_reports_new_connection() {
        let binder = ConnectionBinder::new();
        let (connection, _rx) = ChannelConnection::new();
        let connection: Arc<dyn Connection> = connection;
        let a = subscription();
        let b = subscription();

        assert!(binder.bind(&a, &connection));
        assert!(!binder.bind(&b, &connection));
        assert!(!binder.bind(&a, &connection));
        assert_eq!(binder.bound_to(connection.id()), 2);
        assert_eq!(a.connection_id(), Some(connection.id()));
    }

    #[test]
    fn test_rebind_moves_subscription() {
        let binder = ConnectionBinder::new();
        let (first, _rx1) = ChannelConnection::new();
        let (second, _rx2) = ChannelConnection::new();
        let first: Arc<dyn Connection> = first;
        let second: Arc<dyn Connection> = second;
        let sub = subscription();

        binder.bind(&sub, &first);
        binder.bind(&sub, &second);
        assert_eq!(binder.bound_to(first.id()), 0);
        assert_eq!(binder.bound_to(second.id()), 1);
        assert_eq!(sub.connection_id(), Some(second.id()));
    }

    #[test]
    fn test_take_and_unbind() {
        let binder = ConnectionBinder::new();
        let (connection, _rx) = ChannelConnection::new();
        let connection: Arc<dyn Connection> = connection;
        let a = subscription();
        let b = subscription();
        binder.bind(&a, &connection);
        binder.bind(&b, &connection);

        binder.unbind(&a);
        assert_eq!(binder.bound_to(connection.id()), 1);

        let taken = binder.take(connection.id());
        assert_eq!(taken.len(), 1);
        assert!(Arc::ptr_eq(&taken[0], &b));
        assert_eq!(binder.bound_to(connection.id()), 0);
        assert!(binder.take(connection.id()).is_empty());
    }
}
