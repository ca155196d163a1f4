//! Write operations with optimistic updates and rollback.
//!
//! A [`MutationEngine`] executes a write against the backend. Configured
//! with an [optimistic update](MutationConfig::optimistic_update), it
//! provisionally rewrites the cached value of every affected query before
//! the network result is known; if the write then fails, every touched
//! value is restored exactly as it was. After a successful write the
//! affected queries are invalidated, so a fresh refetch supersedes the
//! optimistic value.
//!
//! # Example
//!
//! ```rust,ignore
//! use refetch::prelude::*;
//!
//! let add_todo = registry.get_or_create_mutation(
//!     "add-todo",
//!     |title: String| Box::pin(async move { post_todo(title).await }),
//!     MutationConfig::default()
//!         .optimistic_update(|title, todos: Option<&Vec<String>>| {
//!             let mut next = todos.cloned().unwrap_or_default();
//!             next.push(title.clone());
//!             next
//!         })
//!         .invalidate_keys([QueryKey::from("todos")]),
//! )?;
//!
//! // the todos query shows the new item immediately; on failure it
//! // snaps back to the previous list
//! add_todo.mutate("buy milk".to_string()).await?;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::cache::CacheStore;
use crate::error::{FetchError, MutationError};
use crate::key::QueryKey;
use crate::query::QueryData;
use crate::registry::RegistryShared;

/// A mutation function: takes the variables, performs the write.
pub type MutationFn<T, V> =
    Arc<dyn Fn(V) -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync>;

/// Bounds required of mutation variables.
pub trait MutationVariables: Clone + fmt::Debug + Send + Sync + 'static {}

impl<V> MutationVariables for V where V: Clone + fmt::Debug + Send + Sync + 'static {}

/// Lifecycle phase of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationStatus {
    /// Not started, or reset.
    #[default]
    Idle,
    /// The write is in flight.
    Loading,
    /// The last write succeeded.
    Success,
    /// The last write failed (optimistic state already rolled back).
    Error,
}

/// A snapshot of a mutation's state.
#[derive(Debug, Clone)]
pub struct MutationState<T> {
    pub status: MutationStatus,
    /// Result of the last successful write, if any.
    pub data: Option<T>,
    /// Set only while `status` is [`MutationStatus::Error`].
    pub error: Option<MutationError>,
}

impl<T> MutationState<T> {
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            status: MutationStatus::Idle,
            data: None,
            error: None,
        }
    }

    pub const fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub const fn is_idle(&self) -> bool {
        matches!(self.status, MutationStatus::Idle)
    }

    pub const fn is_loading(&self) -> bool {
        matches!(self.status, MutationStatus::Loading)
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.status, MutationStatus::Success)
    }

    pub const fn is_error(&self) -> bool {
        matches!(self.status, MutationStatus::Error)
    }
}

impl<T> Default for MutationState<T> {
    fn default() -> Self {
        Self::idle()
    }
}

/// Configuration for a mutation.
///
/// All fields are optional; [`MutationConfig::default`] is a plain write
/// with no optimistic update, no invalidation and no timeout.
pub struct MutationConfig<T, V> {
    pub(crate) optimistic_update: Option<Arc<dyn Fn(&V, Option<&T>) -> T + Send + Sync>>,
    pub(crate) invalidate_keys: Vec<QueryKey>,
    pub(crate) on_success: Option<Arc<dyn Fn(&T, &V) + Send + Sync>>,
    pub(crate) on_error: Option<Arc<dyn Fn(&MutationError, &V) + Send + Sync>>,
    pub(crate) timeout: Option<Duration>,
}

impl<T, V> Default for MutationConfig<T, V> {
    fn default() -> Self {
        Self {
            optimistic_update: None,
            invalidate_keys: Vec::new(),
            on_success: None,
            on_error: None,
            timeout: None,
        }
    }
}

impl<T, V> MutationConfig<T, V> {
    /// Sets the optimistic update, applied to every invalidate key that
    /// has a cached value before the write runs.
    ///
    /// The hook receives the variables and the currently cached value and
    /// produces the provisional value.
    #[must_use]
    pub fn optimistic_update<F>(mut self, update: F) -> Self
    where
        F: Fn(&V, Option<&T>) -> T + Send + Sync + 'static,
    {
        self.optimistic_update = Some(Arc::new(update));
        self
    }

    /// Sets the query keys invalidated after a successful write (and
    /// optimistically updated before it).
    #[must_use]
    pub fn invalidate_keys(mut self, keys: impl IntoIterator<Item = QueryKey>) -> Self {
        self.invalidate_keys = keys.into_iter().collect();
        self
    }

    /// Called with the result and the variables after a successful write.
    #[must_use]
    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&T, &V) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(callback));
        self
    }

    /// Called with the error and the variables after a failed write.
    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&MutationError, &V) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Fails the write with a timeout error when it exceeds `limit`.
    #[must_use]
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }
}

struct MutationShared<T, V> {
    name: String,
    mutation_fn: MutationFn<T, V>,
    config: MutationConfig<T, V>,
    cache: Arc<CacheStore>,
    registry: Weak<RegistryShared>,
    state: watch::Sender<MutationState<T>>,
    disposed: AtomicBool,
}

/// Engine executing one named mutation.
///
/// Obtain one through
/// [`QueryRegistry::get_or_create_mutation`](crate::registry::QueryRegistry::get_or_create_mutation);
/// clones share state, so every observer of a name sees the same machine.
pub struct MutationEngine<T, V> {
    inner: Arc<MutationShared<T, V>>,
}

impl<T, V> Clone for MutationEngine<T, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, V> MutationEngine<T, V>
where
    T: QueryData,
    V: MutationVariables,
{
    pub(crate) fn new(
        name: String,
        mutation_fn: MutationFn<T, V>,
        config: MutationConfig<T, V>,
        cache: Arc<CacheStore>,
        registry: Weak<RegistryShared>,
    ) -> Self {
        let (state, _) = watch::channel(MutationState::idle());
        Self {
            inner: Arc::new(MutationShared {
                name,
                mutation_fn,
                config,
                cache,
                registry,
                state,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// The name this mutation was registered under.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The current state.
    pub fn state(&self) -> MutationState<T> {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MutationState<T>> {
        self.inner.state.subscribe()
    }

    /// The state changes as a stream; the first item is the current state.
    pub fn watch(&self) -> WatchStream<MutationState<T>> {
        WatchStream::new(self.subscribe())
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Executes the mutation.
    ///
    /// Applies the optimistic update first (when configured), runs the
    /// write, and on failure restores every optimistically touched value
    /// before the error is returned. Affected queries are invalidated
    /// after a success.
    pub async fn mutate(&self, variables: V) -> Result<T, MutationError> {
        if self.is_disposed() {
            return Err(self.error_for(&variables, FetchError::Failed(
                "mutation engine disposed".to_string(),
            )));
        }

        self.emit(|state| {
            state.status = MutationStatus::Loading;
            state.error = None;
        });

        // rollback bookkeeping lives in this invocation only, so
        // overlapping mutate() calls cannot corrupt each other's snapshots
        let mut rollback: Vec<(QueryKey, T)> = Vec::new();
        if let Some(update) = &self.inner.config.optimistic_update {
            for key in &self.inner.config.invalidate_keys {
                let canonical = key.canonical();
                if let Some(entry) = self.inner.cache.get::<T>(&canonical) {
                    let optimistic = update(&variables, Some(&entry.data));
                    self.apply_value(&canonical, optimistic);
                    rollback.push((key.clone(), entry.data));
                }
            }
        }

        let attempt = (self.inner.mutation_fn)(variables.clone());
        let result = match self.inner.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(limit)),
            },
            None => attempt.await,
        };

        match result {
            Ok(data) => {
                let emitted = data.clone();
                self.emit(move |state| {
                    *state = MutationState {
                        status: MutationStatus::Success,
                        data: Some(emitted),
                        error: None,
                    };
                });
                if let Some(on_success) = &self.inner.config.on_success {
                    on_success(&data, &variables);
                }
                // a fresh refetch supersedes any optimistic value
                if let Some(registry) = self.inner.registry.upgrade() {
                    for key in &self.inner.config.invalidate_keys {
                        registry.invalidate_queries(key).await;
                    }
                }
                Ok(data)
            }
            Err(source) => {
                for (key, previous) in rollback {
                    self.apply_value(&key.canonical(), previous);
                }
                let error = self.error_for(&variables, source);
                tracing::warn!(%error, "mutation failed, optimistic state rolled back");
                let emitted = error.clone();
                self.emit(move |state| {
                    state.status = MutationStatus::Error;
                    state.error = Some(emitted);
                });
                if let Some(on_error) = &self.inner.config.on_error {
                    on_error(&error, &variables);
                }
                Err(error)
            }
        }
    }

    /// Forces the state back to idle without touching the cache.
    pub fn reset(&self) {
        if self.is_disposed() {
            return;
        }
        self.emit(|state| *state = MutationState::idle());
    }

    /// Marks the engine disposed; further calls and emissions are dropped.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(name = %self.inner.name, "mutation engine disposed");
    }

    /// Writes `value` through the live query engine when one exists (which
    /// also updates the cache); otherwise writes the cache directly.
    fn apply_value(&self, canonical: &str, value: T) {
        let engine = self
            .inner
            .registry
            .upgrade()
            .and_then(|registry| registry.lookup_query::<T>(canonical));
        match engine {
            Some(engine) => engine.set_data(value),
            None => self.inner.cache.set(canonical, value, None),
        }
    }

    fn error_for(&self, variables: &V, source: FetchError) -> MutationError {
        MutationError {
            name: self.inner.name.clone(),
            variables: format!("{variables:?}"),
            source,
        }
    }

    fn emit<F>(&self, apply: F)
    where
        F: FnOnce(&mut MutationState<T>),
    {
        if self.is_disposed() {
            tracing::debug!(name = %self.inner.name, "emission dropped after dispose");
            return;
        }
        self.inner.state.send_modify(apply);
    }
}
