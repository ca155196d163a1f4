//! The registry: identity-preserving directory of engines.
//!
//! This is the entry point applications hold on to. It binds canonical
//! keys to engine instances: the first `get_or_create_*` call for a key
//! constructs and starts the engine, every later call returns the same
//! instance. That identity is what makes request deduplication fall out
//! naturally — all consumers of a key share one state machine and one
//! in-flight fetch.
//!
//! The registry owns no globals; construct it (and its [`CacheStore`] and
//! [`NetworkMonitor`]) during application startup and dispose it during
//! shutdown.
//!
//! # Example
//!
//! ```rust,ignore
//! use refetch::prelude::*;
//!
//! let registry = QueryRegistry::with_services(
//!     Arc::new(CacheStore::with_durable(durable_backend)),
//!     network_monitor,
//! );
//!
//! let todos = registry.get_or_create_query(
//!     "todos",
//!     || Box::pin(async { fetch_todos().await }),
//!     QueryConfig::default(),
//! )?;
//! ```

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;

use crate::cache::CacheStore;
use crate::config::QueryConfig;
use crate::error::{FetchError, RegistryError};
use crate::infinite::{InfiniteQueryEngine, PageFetcher, Pagination};
use crate::key::QueryKey;
use crate::mutation::{MutationConfig, MutationEngine, MutationFn, MutationVariables};
use crate::network::NetworkMonitor;
use crate::query::{QueryData, QueryEngine, QueryFetcher};

/// Type-erased handle to a query-like engine, so the registry can route
/// invalidation and lifecycle signals without knowing the data type.
pub(crate) trait EngineHandle: Send + Sync {
    fn invalidate(&self) -> BoxFuture<'static, ()>;
    fn refetch(&self) -> BoxFuture<'static, ()>;
    fn notify_focus(&self) -> BoxFuture<'static, ()>;
    fn dispose(&self);
    fn as_any(&self) -> &dyn Any;
}

impl<T: QueryData> EngineHandle for QueryEngine<T> {
    fn invalidate(&self) -> BoxFuture<'static, ()> {
        let engine = self.clone();
        Box::pin(async move { engine.invalidate(false).await })
    }

    fn refetch(&self) -> BoxFuture<'static, ()> {
        let engine = self.clone();
        Box::pin(async move { engine.refetch().await })
    }

    fn notify_focus(&self) -> BoxFuture<'static, ()> {
        let engine = self.clone();
        Box::pin(async move { engine.notify_focus().await })
    }

    fn dispose(&self) {
        QueryEngine::dispose(self);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T, P> EngineHandle for InfiniteQueryEngine<T, P>
where
    T: QueryData,
    P: QueryData,
{
    fn invalidate(&self) -> BoxFuture<'static, ()> {
        let engine = self.clone();
        Box::pin(async move { engine.invalidate(false).await })
    }

    fn refetch(&self) -> BoxFuture<'static, ()> {
        let engine = self.clone();
        Box::pin(async move { engine.refetch().await })
    }

    fn notify_focus(&self) -> BoxFuture<'static, ()> {
        let engine = self.clone();
        Box::pin(async move { engine.notify_focus().await })
    }

    fn dispose(&self) {
        InfiniteQueryEngine::dispose(self);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Type-erased handle to a mutation engine.
pub(crate) trait MutationHandle: Send + Sync {
    fn dispose(&self);
    fn as_any(&self) -> &dyn Any;
}

impl<T, V> MutationHandle for MutationEngine<T, V>
where
    T: QueryData,
    V: MutationVariables,
{
    fn dispose(&self) {
        MutationEngine::dispose(self);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// State shared between the registry and the mutation engines that need to
/// route invalidation back through it.
pub(crate) struct RegistryShared {
    cache: Arc<CacheStore>,
    monitor: NetworkMonitor,
    queries: DashMap<String, Box<dyn EngineHandle>>,
    infinite: DashMap<String, Box<dyn EngineHandle>>,
    mutations: DashMap<String, Box<dyn MutationHandle>>,
    disposed: AtomicBool,
}

impl RegistryShared {
    /// Typed lookup of a live query engine by canonical key.
    pub(crate) fn lookup_query<T: QueryData>(&self, canonical: &str) -> Option<QueryEngine<T>> {
        self.queries
            .get(canonical)
            .and_then(|handle| handle.as_any().downcast_ref::<QueryEngine<T>>().cloned())
    }

    /// Invalidates the engines registered under `key`, if any.
    pub(crate) async fn invalidate_queries(&self, key: &QueryKey) {
        let canonical = key.canonical();
        let query = self.queries.get(&canonical).map(|handle| handle.invalidate());
        if let Some(invalidate) = query {
            invalidate.await;
        }
        let infinite = self.infinite.get(&canonical).map(|handle| handle.invalidate());
        if let Some(invalidate) = infinite {
            invalidate.await;
        }
    }

    pub(crate) async fn refetch_queries(&self, key: &QueryKey) {
        let canonical = key.canonical();
        let query = self.queries.get(&canonical).map(|handle| handle.refetch());
        if let Some(refetch) = query {
            refetch.await;
        }
        let infinite = self.infinite.get(&canonical).map(|handle| handle.refetch());
        if let Some(refetch) = infinite {
            refetch.await;
        }
    }

    async fn notify_focus(&self) {
        let signals: Vec<_> = self
            .queries
            .iter()
            .map(|entry| entry.value().notify_focus())
            .chain(self.infinite.iter().map(|entry| entry.value().notify_focus()))
            .collect();
        futures::future::join_all(signals).await;
    }

    fn dispose(&self) {
        for entry in self.queries.iter() {
            entry.value().dispose();
        }
        self.queries.clear();
        for entry in self.infinite.iter() {
            entry.value().dispose();
        }
        self.infinite.clear();
        for entry in self.mutations.iter() {
            entry.value().dispose();
        }
        self.mutations.clear();
    }
}

/// Identity-preserving factory and directory for engines.
///
/// Cheap to clone; clones share the directory.
#[derive(Clone)]
pub struct QueryRegistry {
    inner: Arc<RegistryShared>,
}

impl QueryRegistry {
    /// Creates a registry with a memory-only cache and a fresh
    /// [`NetworkMonitor`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_services(Arc::new(CacheStore::new()), NetworkMonitor::new())
    }

    /// Creates a registry over host-constructed services.
    #[must_use]
    pub fn with_services(cache: Arc<CacheStore>, monitor: NetworkMonitor) -> Self {
        Self {
            inner: Arc::new(RegistryShared {
                cache,
                monitor,
                queries: DashMap::new(),
                infinite: DashMap::new(),
                mutations: DashMap::new(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// The cache store engines read and write.
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.inner.cache
    }

    /// The network monitor engines subscribe to.
    pub fn monitor(&self) -> &NetworkMonitor {
        &self.inner.monitor
    }

    /// Returns the engine registered under `key`, creating and starting it
    /// on first use.
    ///
    /// Must be called within a tokio runtime: creation spawns the engine's
    /// initialization pass.
    pub fn get_or_create_query<T, F>(
        &self,
        key: impl Into<QueryKey>,
        fetcher: F,
        config: QueryConfig,
    ) -> Result<QueryEngine<T>, RegistryError>
    where
        T: QueryData,
        F: Fn() -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync + 'static,
    {
        if self.is_disposed() {
            return Err(RegistryError::Disposed);
        }
        let key = key.into();
        let canonical = key.canonical();

        let mut created: Option<QueryEngine<T>> = None;
        let engine = match self.inner.queries.entry(canonical.clone()) {
            Entry::Occupied(slot) => {
                match slot.get().as_any().downcast_ref::<QueryEngine<T>>() {
                    Some(engine) => engine.clone(),
                    None => return Err(RegistryError::TypeMismatch { key: canonical }),
                }
            }
            Entry::Vacant(slot) => {
                let fetcher: QueryFetcher<T> = Arc::new(fetcher);
                let engine = QueryEngine::new(key, fetcher, config, self.inner.cache.clone());
                slot.insert(Box::new(engine.clone()));
                created = Some(engine.clone());
                engine
            }
        };

        if let Some(engine) = created {
            engine.start(&self.inner.monitor);
        }
        Ok(engine)
    }

    /// Like [`get_or_create_query`](Self::get_or_create_query) for
    /// cursor-paginated queries.
    pub fn get_or_create_infinite_query<T, P, F>(
        &self,
        key: impl Into<QueryKey>,
        fetcher: F,
        pagination: Pagination<T, P>,
        config: QueryConfig,
    ) -> Result<InfiniteQueryEngine<T, P>, RegistryError>
    where
        T: QueryData,
        P: QueryData,
        F: Fn(Option<P>) -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync + 'static,
    {
        if self.is_disposed() {
            return Err(RegistryError::Disposed);
        }
        let key = key.into();
        let canonical = key.canonical();

        let mut created: Option<InfiniteQueryEngine<T, P>> = None;
        let engine = match self.inner.infinite.entry(canonical.clone()) {
            Entry::Occupied(slot) => {
                match slot.get().as_any().downcast_ref::<InfiniteQueryEngine<T, P>>() {
                    Some(engine) => engine.clone(),
                    None => return Err(RegistryError::TypeMismatch { key: canonical }),
                }
            }
            Entry::Vacant(slot) => {
                let fetcher: PageFetcher<T, P> = Arc::new(fetcher);
                let engine = InfiniteQueryEngine::new(
                    key,
                    fetcher,
                    pagination,
                    config,
                    self.inner.cache.clone(),
                );
                slot.insert(Box::new(engine.clone()));
                created = Some(engine.clone());
                engine
            }
        };

        if let Some(engine) = created {
            engine.start(&self.inner.monitor);
        }
        Ok(engine)
    }

    /// Returns the mutation engine registered under `name`, creating it on
    /// first use. Identity is the caller-supplied name, not derived from
    /// the mutation itself.
    pub fn get_or_create_mutation<T, V, F>(
        &self,
        name: &str,
        mutation_fn: F,
        config: MutationConfig<T, V>,
    ) -> Result<MutationEngine<T, V>, RegistryError>
    where
        T: QueryData,
        V: MutationVariables,
        F: Fn(V) -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync + 'static,
    {
        if self.is_disposed() {
            return Err(RegistryError::Disposed);
        }
        match self.inner.mutations.entry(name.to_string()) {
            Entry::Occupied(slot) => {
                match slot.get().as_any().downcast_ref::<MutationEngine<T, V>>() {
                    Some(engine) => Ok(engine.clone()),
                    None => Err(RegistryError::TypeMismatch {
                        key: name.to_string(),
                    }),
                }
            }
            Entry::Vacant(slot) => {
                let mutation_fn: MutationFn<T, V> = Arc::new(mutation_fn);
                let engine = MutationEngine::new(
                    name.to_string(),
                    mutation_fn,
                    config,
                    self.inner.cache.clone(),
                    Arc::downgrade(&self.inner),
                );
                slot.insert(Box::new(engine.clone()));
                Ok(engine)
            }
        }
    }

    /// Invalidates the engines registered under `key`; a key with no
    /// engine is a no-op, not an error.
    pub async fn invalidate_queries(&self, key: impl Into<QueryKey>) {
        if self.is_disposed() {
            return;
        }
        self.inner.invalidate_queries(&key.into()).await;
    }

    /// Forces a refetch of the engines registered under `key`; no-op when
    /// none exist.
    pub async fn refetch_queries(&self, key: impl Into<QueryKey>) {
        if self.is_disposed() {
            return;
        }
        self.inner.refetch_queries(&key.into()).await;
    }

    /// Delivers the host's focus signal to every query engine; each engine
    /// decides whether to refetch (configured and stale).
    pub async fn notify_focus(&self) {
        if self.is_disposed() {
            return;
        }
        self.inner.notify_focus().await;
    }

    /// Removes every cache entry from both tiers.
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    /// Disposes every registered engine and clears the directory. The
    /// registry is unusable afterwards: `get_or_create_*` returns
    /// [`RegistryError::Disposed`] and signal routing becomes a no-op.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.dispose();
        tracing::debug!("query registry disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl Default for QueryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
