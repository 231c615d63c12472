//! Table of active subscriptions.

use crate::types::{Owner, SubscriptionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::subscription::Subscription;

/// Active subscriptions by id.
///
/// Lookups that act on behalf of a caller go through [`find_owned`], which
/// hides subscriptions belonging to another user or tenant.
///
/// [`find_owned`]: SubscriptionManager::find_owned
pub struct SubscriptionManager {
    subscriptions: RwLock<HashMap<SubscriptionId, Arc<Subscription>>>,
}

impl SubscriptionManager {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, subscription: Arc<Subscription>) {
        self.subscriptions
            .write()
            .insert(subscription.id().clone(), subscription);
    }

    /// The live subscription `id`, if it belongs to `owner`.
    pub fn find_owned(&self, id: &SubscriptionId, owner: &Owner) -> Option<Arc<Subscription>> {
        self.subscriptions
            .read()
            .get(id)
            .filter(|sub| sub.owner() == owner)
            .cloned()
    }

    /// Remove exactly this subscription object. A different subscription
    /// registered under the same id is left alone.
    pub(crate) fn remove(&self, subscription: &Arc<Subscription>) -> bool {
        let mut subs = self.subscriptions.write();
        let same = subs
            .get(subscription.id())
            .map(|current| Arc::ptr_eq(current, subscription))
            .unwrap_or(false);
        if same {
            subs.remove(subscription.id());
        }
        same
    }

    /// Active subscriptions of the publication named `publication`.
    pub fn using_publication(&self, publication: &str) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .read()
            .values()
            .filter(|sub| sub.publication().name() == publication)
            .cloned()
            .collect()
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn list(&self) -> Vec<Arc<Subscription>> {
        self.subscriptions.read().values().cloned().collect()
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publications::{fetch_fn, PublicationRegistry};
    use crate::subscriptions::DEFAULT_REVISION_HISTORY;
    use crate::types::{Params, User};
    use serde_json::Value;

    fn make_subscription(
        registry: &PublicationRegistry,
        publication: &str,
        user: &User,
    ) -> Arc<Subscription> {
        let publication = registry.lookup(publication).unwrap();
        Arc::new(Subscription::new(
            SubscriptionId::generate(),
            user.owner().unwrap(),
            user.clone(),
            publication,
            Params::new(),
            Params::new(),
            DEFAULT_REVISION_HISTORY,
        ))
    }

    fn registry() -> PublicationRegistry {
        let registry = PublicationRegistry::new();
        for name in ["magazines", "books"] {
            registry
                .register(
                    name,
                    fetch_fn(|_, _, _| async { Ok(Value::Null) }),
                    ["DATA"],
                    Default::default(),
                )
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_insert_remove() {
        let registry = registry();
        let manager = SubscriptionManager::new();
        let sub = make_subscription(&registry, "magazines", &User::new("u1", "t1"));

        manager.insert(Arc::clone(&sub));
        assert_eq!(manager.subscription_count(), 1);

        assert!(manager.remove(&sub));
        assert_eq!(manager.subscription_count(), 0);
        assert!(!manager.remove(&sub));
    }

    #[test]
    fn test_find_owned_hides_other_owners() {
        let registry = registry();
        let manager = SubscriptionManager::new();
        let owner = User::new("u1", "t1");
        let sub = make_subscription(&registry, "magazines", &owner);
        manager.insert(Arc::clone(&sub));

        assert!(manager
            .find_owned(sub.id(), &owner.owner().unwrap())
            .is_some());
        assert!(manager
            .find_owned(sub.id(), &User::new("u2", "t1").owner().unwrap())
            .is_none());
        assert!(manager
            .find_owned(sub.id(), &User::new("u1", "t2").owner().unwrap())
            .is_none());
    }

    #[test]
    fn test_using_publication() {
        let registry = registry();
        let manager = SubscriptionManager::new();
        let user = User::new("u1", "t1");
        manager.insert(make_subscription(&registry, "magazines", &user));
        manager.insert(make_subscription(&registry, "magazines", &user));
        manager.insert(make_subscription(&registry, "books", &user));

        assert_eq!(manager.using_publication("magazines").len(), 2);
        assert_eq!(manager.using_publication("books").len(), 1);
        assert!(manager.using_publication("authors").is_empty());
        assert_eq!(manager.list().len(), 3);
    }
}
