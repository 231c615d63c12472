//! Publication definitions and the name -> publication table.

use crate::error::{BoxError, Result, SyncError};
use crate::types::{Params, User};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Future returned by a fetch function: a single record, an array of
/// records, or null for "nothing".
pub type FetchFuture = BoxFuture<'static, std::result::Result<Value, BoxError>>;

/// `(tenant_id, user, params) -> records`.
pub type FetchFn = Arc<dyn Fn(&str, &User, &Params) -> FetchFuture + Send + Sync>;

/// `(tenant_id, user, additional_params)`, run once per new subscription.
pub type InitFn = Arc<dyn Fn(&str, &User, &mut Params) + Send + Sync>;

/// Wrap an async closure as a [`FetchFn`].
pub fn fetch_fn<F, Fut>(f: F) -> FetchFn
where
    F: Fn(&str, &User, &Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, BoxError>> + Send + 'static,
{
    Arc::new(move |tenant_id: &str, user: &User, params: &Params| -> FetchFuture {
        Box::pin(f(tenant_id, user, params))
    })
}

/// Optional publication behavior.
#[derive(Clone, Default)]
pub struct PublicationOptions {
    /// Derives server-side filter params for each new subscription.
    pub init: Option<InitFn>,
    /// Push the initial data once, then release the subscription.
    pub once: bool,
}

impl PublicationOptions {
    pub fn once() -> Self {
        Self {
            once: true,
            ..Default::default()
        }
    }

    pub fn with_init<F>(mut self, init: F) -> Self
    where
        F: Fn(&str, &User, &mut Params) + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(init));
        self
    }
}

/// A registered publication. Immutable once registered.
pub struct Publication {
    name: String,
    fetch: FetchFn,
    topics: Vec<String>,
    init: Option<InitFn>,
    once: bool,
}

impl Publication {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn is_once(&self) -> bool {
        self.once
    }

    /// Whether a change on `topic` concerns this publication.
    pub fn listens_to(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t == topic)
    }

    /// Start fetching the full dataset for a subscription.
    pub fn fetch(&self, tenant_id: &str, user: &User, params: &Params) -> FetchFuture {
        (self.fetch)(tenant_id, user, params)
    }

    /// Compute the server-side params of a new subscription.
    pub fn initial_params(&self, tenant_id: &str, user: &User) -> Params {
        let mut additional = Params::new();
        if let Some(init) = &self.init {
            init(tenant_id, user, &mut additional);
        }
        additional
    }
}

impl fmt::Debug for Publication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publication")
            .field("name", &self.name)
            .field("topics", &self.topics)
            .field("has_init", &self.init.is_some())
            .field("once", &self.once)
            .finish()
    }
}

/// Process-wide (per engine) table of publications.
#[derive(Default)]
pub struct PublicationRegistry {
    publications: RwLock<HashMap<String, Arc<Publication>>>,
}

impl PublicationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publication, replacing any previous one of the same name.
    ///
    /// A publication must listen to at least one topic unless it is fire-once.
    pub fn register<I, T>(
        &self,
        name: &str,
        fetch: FetchFn,
        topics: I,
        options: PublicationOptions,
    ) -> Result<Arc<Publication>>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let topics: Vec<String> = topics
            .into_iter()
            .map(Into::into)
            .filter(|t| !t.is_empty())
            .collect();

        if topics.is_empty() && !options.once {
            return Err(SyncError::Config(format!(
                "Missing or incorrect data notification when registering publication [{}]",
                name
            )));
        }

        let publication = Arc::new(Publication {
            name: name.to_string(),
            fetch,
            topics,
            init: options.init,
            once: options.once,
        });
        self.publications
            .write()
            .insert(name.to_string(), Arc::clone(&publication));
        Ok(publication)
    }

    /// Find a publication by name.
    pub fn lookup(&self, name: &str) -> Result<Arc<Publication>> {
        self.publications
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::PublicationNotFound(name.to_string()))
    }

    /// All publications reacting to `topic`.
    pub fn listening_to(&self, topic: &str) -> Vec<Arc<Publication>> {
        self.publications
            .read()
            .values()
            .filter(|p| p.listens_to(topic))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.publications.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
