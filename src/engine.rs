//! Main engine tying all components together.

use crate::config::SyncConfig;
use crate::connections::{Connection, ConnectionBinder};
use crate::dispatch::{ClusterNotifier, NoopClusterNotifier};
use crate::error::{Result, SyncError};
use crate::publications::{FetchFn, PublicationOptions, PublicationRegistry};
use crate::subscriptions::{Subscription, SubscriptionManager};
use crate::types::{ConnectionId, Params, SubscriptionId, User};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;

/// Version of the client/server sync protocol. Clients declaring any other
/// version are rejected by the routes.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The sync engine.
///
/// Owns the publication registry, the active-subscription table and the
/// connection bindings. Cloning is cheap and yields a handle to the same
/// engine; separate `SyncEngine::new` calls are fully isolated.
///
/// Fetches, emissions and grace timers run as tasks on a Tokio runtime. The
/// engine keeps a handle to the runtime it was created in, or failing that
/// the one of its first `subscribe` call, so changes and disconnects may be
/// reported from any thread.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    pub(crate) publications: PublicationRegistry,
    pub(crate) subscriptions: SubscriptionManager,
    pub(crate) binder: ConnectionBinder,
    pub(crate) cluster: Arc<dyn ClusterNotifier>,
    grace_period: RwLock<Duration>,
    debug: AtomicBool,
    revision_history: usize,
    runtime: RwLock<Option<Handle>>,
}

/// Non-owning engine handle, held by connection observers and timers.
#[derive(Clone)]
struct WeakEngine(Weak<EngineInner>);

impl WeakEngine {
    fn upgrade(&self) -> Option<SyncEngine> {
        self.0.upgrade().map(|inner| SyncEngine { inner })
    }
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        Self::with_cluster_notifier(config, Arc::new(NoopClusterNotifier))
    }

    /// Create an engine that also forwards every change to `cluster`.
    pub fn with_cluster_notifier(config: SyncConfig, cluster: Arc<dyn ClusterNotifier>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                publications: PublicationRegistry::new(),
                subscriptions: SubscriptionManager::new(),
                binder: ConnectionBinder::new(),
                cluster,
                grace_period: RwLock::new(config.grace_period),
                debug: AtomicBool::new(config.debug),
                revision_history: config.revision_history,
                runtime: RwLock::new(Handle::try_current().ok()),
            }),
        }
    }

    /// Protocol version spoken by this engine.
    pub fn version(&self) -> &'static str {
        PROTOCOL_VERSION
    }

    pub(crate) fn inner(&self) -> &EngineInner {
        &self.inner
    }

    // --- Publications ---

    /// Register a publication. See [`PublicationRegistry::register`].
    pub fn publish<I, T>(
        &self,
        name: &str,
        fetch: FetchFn,
        topics: I,
        options: PublicationOptions,
    ) -> Result<&Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.inner
            .publications
            .register(name, fetch, topics, options)?;
        Ok(self)
    }

    pub fn publications(&self) -> &PublicationRegistry {
        &self.inner.publications
    }

    // --- Subscriptions ---

    /// Subscribe `user` to a publication over `connection`.
    ///
    /// When `subscription_id` names a live subscription owned by the same
    /// user and tenant, that subscription is reused: it is rebound to the
    /// connection and whatever queued up meanwhile is flushed, without
    /// refetching. Otherwise a new subscription with a fresh id is created
    /// and its full dataset is fetched and pushed.
    pub fn subscribe(
        &self,
        user: &User,
        connection: Arc<dyn Connection>,
        subscription_id: Option<&SubscriptionId>,
        publication: &str,
        params: Params,
    ) -> Result<SubscriptionId> {
        let owner = user.owner()?;
        let runtime = self.runtime().ok_or_else(|| {
            SyncError::Defect("subscribe needs a Tokio runtime: call it within one or set_runtime first"
                .to_string())
        })?;

        let reusable =
            subscription_id.and_then(|id| self.inner.subscriptions.find_owned(id, &owner));
        if let Some(existing) = reusable {
            self.log_sub(&existing, "Reusing existing subscription before timeout.");
            self.bind(&existing, &connection);
            if existing.retry_fetch() {
                runtime.spawn(Arc::clone(&existing).fetch_and_emit_all(self.clone()));
            } else {
                existing.flush(self);
            }
            return Ok(existing.id().clone());
        }

        let publication = self.inner.publications.lookup(publication)?;
        let additional_params = publication.initial_params(&owner.tenant_id, user);
        let subscription = Arc::new(Subscription::new(
            SubscriptionId::generate(),
            owner,
            user.clone(),
            Arc::clone(&publication),
            params,
            additional_params,
            self.inner.revision_history,
        ));
        self.inner.subscriptions.insert(Arc::clone(&subscription));
        self.log_sub(
            &subscription,
            &format!("New subscription to {}", publication.name()),
        );

        self.bind(&subscription, &connection);
        runtime.spawn(Arc::clone(&subscription).fetch_and_emit_all(self.clone()));
        Ok(subscription.id().clone())
    }

    /// Release a subscription on behalf of its owner.
    ///
    /// Unknown ids and subscriptions owned by someone else are ignored
    /// silently.
    pub fn unsubscribe(&self, user: &User, subscription_id: &SubscriptionId) -> Result<()> {
        let owner = user.owner()?;
        if let Some(subscription) = self.inner.subscriptions.find_owned(subscription_id, &owner) {
            self.release(&subscription);
        }
        Ok(())
    }

    /// Look up a live subscription owned by `user`.
    pub fn subscription(
        &self,
        user: &User,
        subscription_id: &SubscriptionId,
    ) -> Option<Arc<Subscription>> {
        let owner = user.owner().ok()?;
        self.inner.subscriptions.find_owned(subscription_id, &owner)
    }

    pub fn count_active(&self) -> usize {
        self.inner.subscriptions.subscription_count()
    }

    pub fn list_active(&self) -> Vec<Arc<Subscription>> {
        self.inner.subscriptions.list()
    }

    /// Release every active subscription.
    pub fn clear(&self) {
        for subscription in self.inner.subscriptions.list() {
            self.release(&subscription);
        }
    }

    // --- Configuration ---

    pub fn grace_period(&self) -> Duration {
        *self.inner.grace_period.read()
    }

    /// Change the disconnect grace period. Applies to disconnects from now on.
    pub fn set_grace_period(&self, grace_period: Duration) {
        *self.inner.grace_period.write() = grace_period;
    }

    pub fn is_debug(&self) -> bool {
        self.inner.debug.load(Ordering::Relaxed)
    }

    pub fn set_debug(&self, debug: bool) {
        self.inner.debug.store(debug, Ordering::Relaxed);
    }

    /// Run the engine's tasks on `runtime`, for engines built outside one.
    pub fn set_runtime(&self, runtime: Handle) {
        *self.inner.runtime.write() = Some(runtime);
    }

    // --- Internals ---

    /// Remove a subscription from its connection and from the table.
    pub(crate) fn release(&self, subscription: &Arc<Subscription>) {
        self.log_sub(subscription, "Unsubscribed.");
        self.inner.binder.unbind(subscription);
        subscription.mark_released();
        self.inner.subscriptions.remove(subscription);
    }

    /// Bind a subscription, watching the connection on first sight.
    fn bind(&self, subscription: &Arc<Subscription>, connection: &Arc<dyn Connection>) {
        if self.inner.binder.bind(subscription, connection) {
            let engine = self.downgrade();
            let connection_id = connection.id();
            connection.on_disconnect(Box::new(move || {
                if let Some(engine) = engine.upgrade() {
                    engine.connection_lost(connection_id);
                }
            }));
        }
    }

    /// Unbind everything bound to a lost connection and schedule the
    /// eviction of whatever is still unbound once the grace period is over.
    fn connection_lost(&self, connection_id: ConnectionId) {
        let orphans: Vec<_> = self
            .inner
            .binder
            .take(connection_id)
            .into_iter()
            .filter(|subscription| subscription.detach_from(connection_id))
            .collect();
        if orphans.is_empty() {
            return;
        }
        for subscription in &orphans {
            self.log_sub(subscription, "Unbound due to disconnection.");
        }

        // Subscriptions only exist once a runtime has been captured.
        let Some(runtime) = self.runtime() else {
            tracing::error!(
                connection_id = %connection_id,
                "no Tokio runtime for the grace timer"
            );
            return;
        };

        let grace_period = self.grace_period();
        let engine = self.downgrade();
        runtime.spawn(async move {
            tokio::time::sleep(grace_period).await;
            if let Some(engine) = engine.upgrade() {
                evict_unbound(&engine, &orphans);
            }
        });
    }

    /// The engine's runtime, captured from the calling context on first use.
    pub(crate) fn runtime(&self) -> Option<Handle> {
        if let Some(handle) = self.inner.runtime.read().as_ref() {
            return Some(handle.clone());
        }
        let handle = Handle::try_current().ok()?;
        *self.inner.runtime.write() = Some(handle.clone());
        Some(handle)
    }

    fn downgrade(&self) -> WeakEngine {
        WeakEngine(Arc::downgrade(&self.inner))
    }

    /// Subscription lifecycle log line, emitted only in debug mode.
    pub(crate) fn log_sub(&self, subscription: &Subscription, text: &str) {
        if self.is_debug() {
            tracing::debug!(
                user = %subscription.user().display_name(),
                publication = %subscription.publication().name(),
                subscription_id = %subscription.id(),
                "{}",
                text
            );
        }
    }
}

/// Release the subscriptions that nobody reclaimed.
fn evict_unbound(engine: &SyncEngine, orphans: &[Arc<Subscription>]) {
    for subscription in orphans {
        if !subscription.is_bound() && !subscription.is_released() {
            engine.log_sub(subscription, "Timeout. Discarding Subscription. No longer in use.");
            engine.release(subscription);
        }
    }
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}
