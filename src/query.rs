//! Single-value query engine with caching and automatic refetching.
//!
//! A [`QueryEngine`] is the per-key state machine behind every query: it
//! owns the fetcher, consults the cache, applies the retry policy and
//! publishes [`QueryState`] snapshots to subscribers.
//!
//! # Design Pattern: Stale-While-Revalidate
//!
//! When an engine is created for a key:
//!
//! 1. If cached data exists, it is immediately published as `Success` with
//!    its computed staleness.
//! 2. If that data is stale (or missing), a fetch is triggered — in the
//!    background for stale data (the visible status stays `Success`), in
//!    the foreground for a miss.
//! 3. Invalidation resets the engine and refetches.
//!
//! Exactly one engine exists per key (see
//! [`QueryRegistry`](crate::registry::QueryRegistry)), so concurrent
//! consumers of a key share one in-flight fetch instead of issuing
//! duplicates.
//!
//! # Example
//!
//! ```rust,ignore
//! use refetch::prelude::*;
//!
//! let registry = QueryRegistry::new();
//!
//! let user = registry.get_or_create_query(
//!     ["user", "123"],
//!     || Box::pin(async { fetch_user().await }),
//!     QueryConfig::new(Duration::from_secs(30), Duration::from_secs(300)),
//! )?;
//!
//! let mut states = user.watch();
//! while let Some(state) = states.next().await {
//!     match state.status {
//!         QueryStatus::Success => render(state.data.as_ref()),
//!         QueryStatus::Error => show_error(state.error.as_ref()),
//!         _ => show_spinner(),
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheStore;
use crate::config::QueryConfig;
use crate::error::{FetchError, QueryError};
use crate::key::QueryKey;
use crate::network::{NetworkMonitor, NetworkStatus};
use crate::retry::RetryPolicy;

/// Bounds required of query data: cloneable for snapshots, serializable
/// for the durable cache tier.
pub trait QueryData: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> QueryData for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// A query fetcher: zero-argument async operation producing the data.
pub type QueryFetcher<T> =
    Arc<dyn Fn() -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync>;

/// Lifecycle phase of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
    /// Not fetched yet (or reset by invalidation).
    #[default]
    Idle,
    /// A foreground fetch is in flight.
    Loading,
    /// The last fetch succeeded.
    Success,
    /// The last fetch failed after exhausting retries.
    Error,
}

/// A snapshot of a query's state.
///
/// `data` is retained across reloads and failures: a `Loading` or `Error`
/// snapshot still carries the previously fetched value so consumers never
/// flash empty content.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
    pub status: QueryStatus,
    /// Most recently fetched (or seeded) data, if any.
    pub data: Option<T>,
    /// Set only while `status` is [`QueryStatus::Error`].
    pub error: Option<QueryError>,
    /// Whether `data` is older than the configured stale time.
    pub is_stale: bool,
    /// When the last successful fetch completed; set only by success.
    pub last_fetched_at: Option<Instant>,
}

impl<T> QueryState<T> {
    /// The initial state.
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            is_stale: false,
            last_fetched_at: None,
        }
    }

    /// Returns the data if present.
    pub const fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub const fn is_idle(&self) -> bool {
        matches!(self.status, QueryStatus::Idle)
    }

    pub const fn is_loading(&self) -> bool {
        matches!(self.status, QueryStatus::Loading)
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.status, QueryStatus::Success)
    }

    pub const fn is_error(&self) -> bool {
        matches!(self.status, QueryStatus::Error)
    }

    pub(crate) fn compute_stale(&self, stale_time: Duration) -> bool {
        self.last_fetched_at
            .map_or(true, |at| at.elapsed() > stale_time)
    }
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self::idle()
    }
}

struct QueryShared<T> {
    key: QueryKey,
    canonical: String,
    fetcher: QueryFetcher<T>,
    config: QueryConfig,
    cache: Arc<CacheStore>,
    state: watch::Sender<QueryState<T>>,
    in_flight: AtomicBool,
    disposed: AtomicBool,
    cancel: CancellationToken,
}

/// Per-key state machine for a single-value query.
///
/// Engines are cheap handles over shared state; clones observe and drive
/// the same machine. Obtain one through
/// [`QueryRegistry::get_or_create_query`](crate::registry::QueryRegistry::get_or_create_query).
pub struct QueryEngine<T> {
    inner: Arc<QueryShared<T>>,
}

impl<T> Clone for QueryEngine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for QueryEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("key", &self.inner.key)
            .field("canonical", &self.inner.canonical)
            .finish_non_exhaustive()
    }
}

impl<T: QueryData> QueryEngine<T> {
    pub(crate) fn new(
        key: QueryKey,
        fetcher: QueryFetcher<T>,
        config: QueryConfig,
        cache: Arc<CacheStore>,
    ) -> Self {
        let canonical = key.canonical();
        let (state, _) = watch::channel(QueryState::idle());
        Self {
            inner: Arc::new(QueryShared {
                key,
                canonical,
                fetcher,
                config,
                cache,
                state,
                in_flight: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Spawns the initialization pass and, when configured, the network
    /// watcher. Called exactly once by the registry at creation.
    pub(crate) fn start(&self, monitor: &NetworkMonitor) {
        let engine = self.clone();
        tokio::spawn(async move { engine.init().await });

        if self.inner.config.refetch_on_reconnect {
            self.spawn_network_watcher(monitor);
        }
    }

    /// The key this engine serves.
    pub fn key(&self) -> &QueryKey {
        &self.inner.key
    }

    /// The canonical key string (cache/registry identity).
    pub fn canonical_key(&self) -> &str {
        &self.inner.canonical
    }

    /// This engine's configuration.
    pub fn config(&self) -> &QueryConfig {
        &self.inner.config
    }

    /// The current state, with staleness recomputed against the clock.
    pub fn state(&self) -> QueryState<T> {
        let mut state = self.inner.state.borrow().clone();
        state.is_stale = state.compute_stale(self.inner.config.stale_time);
        state
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<QueryState<T>> {
        self.inner.state.subscribe()
    }

    /// The state changes as a stream.
    ///
    /// The first item is the current state, so late subscribers render
    /// immediately.
    pub fn watch(&self) -> WatchStream<QueryState<T>> {
        WatchStream::new(self.subscribe())
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Fetches the data if needed.
    ///
    /// No-op when the query is disabled, when fresh data is present (unless
    /// `force`), or when a fetch is already in flight — concurrent callers
    /// coalesce into the running fetch.
    pub async fn fetch(&self, force: bool) {
        if self.is_disposed() || !self.inner.config.enabled {
            return;
        }
        if !force {
            let state = self.inner.state.borrow();
            if state.is_loading() {
                return;
            }
            if state.data.is_some() && !state.compute_stale(self.inner.config.stale_time) {
                return;
            }
        }
        self.run_fetch(false).await;
    }

    /// Forces a fetch regardless of freshness.
    pub async fn refetch(&self) {
        self.fetch(true).await;
    }

    /// Resets the query and refetches if enabled.
    ///
    /// With `remove_cache` the cache entry is purged as well; otherwise the
    /// refetch simply overwrites it.
    pub async fn invalidate(&self, remove_cache: bool) {
        if self.is_disposed() {
            return;
        }
        if remove_cache {
            self.inner.cache.remove(&self.inner.canonical);
        }
        self.emit(|state| *state = QueryState::idle());
        if self.inner.config.enabled {
            self.fetch(false).await;
        }
    }

    /// Publishes `data` as a fresh success and writes it to the cache,
    /// bypassing the fetcher. Used to seed state from elsewhere, e.g.
    /// optimistic mutations.
    pub fn set_data(&self, data: T) {
        if self.is_disposed() {
            return;
        }
        self.inner.cache.set(
            &self.inner.canonical,
            data.clone(),
            Some(self.inner.config.cache_time),
        );
        self.emit(move |state| {
            *state = QueryState {
                status: QueryStatus::Success,
                data: Some(data),
                error: None,
                is_stale: false,
                last_fetched_at: Some(Instant::now()),
            };
        });
    }

    /// Host-delivered focus signal: refetches when configured and stale.
    pub async fn notify_focus(&self) {
        if self.is_disposed() || !self.inner.config.refetch_on_focus {
            return;
        }
        if self.state().is_stale {
            self.refetch().await;
        }
    }

    /// Stops this engine: tears down the network watcher, interrupts any
    /// backoff wait and drops all further emissions. An already-started
    /// fetch attempt is not force-aborted.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.cancel.cancel();
        tracing::debug!(key = %self.inner.canonical, "query engine disposed");
    }

    /// Initialization pass: serve the cache, then revalidate or fetch.
    async fn init(&self) {
        if self.is_disposed() {
            return;
        }
        match self.inner.cache.get::<T>(&self.inner.canonical) {
            Some(entry) => {
                let stale = entry.is_stale(self.inner.config.stale_time);
                let fetched_at = entry.inserted_at;
                let data = entry.data;
                self.emit(move |state| {
                    *state = QueryState {
                        status: QueryStatus::Success,
                        data: Some(data),
                        error: None,
                        is_stale: stale,
                        last_fetched_at: Some(fetched_at),
                    };
                });
                if stale && self.inner.config.enabled {
                    // background revalidation: status stays Success
                    self.run_fetch(true).await;
                }
            }
            None => {
                if self.inner.config.enabled {
                    self.fetch(false).await;
                }
            }
        }
    }

    async fn run_fetch(&self, background: bool) {
        // single-flight: the loser coalesces into the winner's fetch
        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        if !background {
            self.emit(|state| {
                state.status = QueryStatus::Loading;
                state.error = None;
            });
        }

        let fetcher = self.inner.fetcher.clone();
        let policy = RetryPolicy::from(&self.inner.config);
        let result = policy.run(move || fetcher(), &self.inner.cancel).await;

        match result {
            Ok(data) => {
                self.inner.cache.set(
                    &self.inner.canonical,
                    data.clone(),
                    Some(self.inner.config.cache_time),
                );
                self.emit(move |state| {
                    *state = QueryState {
                        status: QueryStatus::Success,
                        data: Some(data),
                        error: None,
                        is_stale: false,
                        last_fetched_at: Some(Instant::now()),
                    };
                });
            }
            Err(source) => {
                let error = QueryError {
                    key: self.inner.canonical.clone(),
                    source,
                };
                tracing::warn!(%error, "query fetch failed");
                // previous data is retained, marked stale
                self.emit(move |state| {
                    state.status = QueryStatus::Error;
                    state.error = Some(error);
                    state.is_stale = true;
                });
            }
        }

        self.inner.in_flight.store(false, Ordering::SeqCst);
    }

    fn spawn_network_watcher(&self, monitor: &NetworkMonitor) {
        let engine = self.clone();
        let mut rx = monitor.subscribe();
        tokio::spawn(async move {
            let mut previous = *rx.borrow();
            loop {
                tokio::select! {
                    () = engine.inner.cancel.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = *rx.borrow_and_update();
                        if previous == NetworkStatus::Offline
                            && current == NetworkStatus::Online
                            && engine.state().is_stale
                        {
                            tracing::debug!(key = %engine.inner.canonical, "refetching on reconnect");
                            engine.refetch().await;
                        }
                        previous = current;
                    }
                }
            }
        });
    }

    fn emit<F>(&self, apply: F)
    where
        F: FnOnce(&mut QueryState<T>),
    {
        if self.is_disposed() {
            tracing::debug!(key = %self.inner.canonical, "emission dropped after dispose");
            return;
        }
        self.inner.state.send_modify(apply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_state() {
        let state: QueryState<i32> = QueryState::idle();
        assert!(state.is_idle());
        assert!(!state.is_loading());
        assert!(!state.is_success());
        assert!(!state.is_error());
        assert!(state.data().is_none());
        assert!(state.error.is_none());
        assert!(state.last_fetched_at.is_none());
    }

    #[test]
    fn test_state_predicates() {
        let success = QueryState {
            status: QueryStatus::Success,
            data: Some(42),
            error: None,
            is_stale: false,
            last_fetched_at: Some(Instant::now()),
        };
        assert!(success.is_success());
        assert_eq!(success.data(), Some(&42));

        let error: QueryState<i32> = QueryState {
            status: QueryStatus::Error,
            data: Some(42),
            error: Some(QueryError {
                key: "[\"k\"]".to_string(),
                source: FetchError::Failed("oops".to_string()),
            }),
            is_stale: true,
            last_fetched_at: None,
        };
        assert!(error.is_error());
        // previous data is retained through failures
        assert_eq!(error.data(), Some(&42));
    }

    #[test]
    fn test_compute_stale_without_fetch_time() {
        let state: QueryState<i32> = QueryState::idle();
        assert!(state.compute_stale(Duration::from_secs(60)));
    }

    #[test]
    fn test_compute_stale_with_recent_fetch() {
        let state: QueryState<i32> = QueryState {
            status: QueryStatus::Success,
            data: Some(1),
            error: None,
            is_stale: false,
            last_fetched_at: Some(Instant::now()),
        };
        assert!(!state.compute_stale(Duration::from_secs(60)));
    }

    #[test]
    fn test_compute_stale_with_old_fetch() {
        let past = Instant::now()
            .checked_sub(Duration::from_millis(100))
            .unwrap();
        let state: QueryState<i32> = QueryState {
            status: QueryStatus::Success,
            data: Some(1),
            error: None,
            is_stale: false,
            last_fetched_at: Some(past),
        };
        // one millisecond past the stale time
        assert!(state.compute_stale(Duration::from_millis(99)));
        assert!(!state.compute_stale(Duration::from_secs(60)));
    }
}
