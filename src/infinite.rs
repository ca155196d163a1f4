//! Cursor-paginated query engine.
//!
//! An [`InfiniteQueryEngine`] manages an ordered sequence of [`Page`]s
//! under one key. The first page behaves exactly like a single-value
//! query (same retry policy, staleness rules and reconnect handling);
//! [`fetch_next_page`](InfiniteQueryEngine::fetch_next_page) extends the
//! sequence using the cursor produced by the pagination hooks.
//!
//! Background revalidation refreshes only the first page. Already-fetched
//! deeper pages are not replayed; after a [`refresh`](InfiniteQueryEngine::refresh)
//! callers paginate forward again to restore depth.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheStore;
use crate::config::QueryConfig;
use crate::error::{FetchError, QueryError};
use crate::key::QueryKey;
use crate::network::{NetworkMonitor, NetworkStatus};
use crate::query::{QueryData, QueryStatus};
use crate::retry::RetryPolicy;

/// One fetched page and the cursor it was requested with.
///
/// `page_param` is `None` for a page fetched without a cursor (the
/// configured initial request).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T, P> {
    pub data: T,
    pub page_param: Option<P>,
}

/// A page fetcher: takes an optional cursor, produces one page of data.
pub type PageFetcher<T, P> =
    Arc<dyn Fn(Option<P>) -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync>;

/// Computes a cursor from the boundary page and the full sequence;
/// `None` means there is nothing further in that direction.
pub type PageParamFn<T, P> = Arc<dyn Fn(&Page<T, P>, &[Page<T, P>]) -> Option<P> + Send + Sync>;

/// Pagination hooks for an infinite query.
pub struct Pagination<T, P> {
    pub(crate) initial_page_param: Option<P>,
    pub(crate) get_next_page_param: PageParamFn<T, P>,
    pub(crate) get_previous_page_param: Option<PageParamFn<T, P>>,
}

impl<T, P> Pagination<T, P> {
    /// Creates pagination with an initial cursor and a next-cursor hook.
    ///
    /// The hook receives the last page and the whole sequence and returns
    /// the cursor for the page after it, or `None` at the end.
    pub fn new<F>(initial_page_param: Option<P>, get_next_page_param: F) -> Self
    where
        F: Fn(&Page<T, P>, &[Page<T, P>]) -> Option<P> + Send + Sync + 'static,
    {
        Self {
            initial_page_param,
            get_next_page_param: Arc::new(get_next_page_param),
            get_previous_page_param: None,
        }
    }

    /// Adds a previous-cursor hook, enabling
    /// [`fetch_previous_page`](InfiniteQueryEngine::fetch_previous_page).
    #[must_use]
    pub fn with_previous<F>(mut self, get_previous_page_param: F) -> Self
    where
        F: Fn(&Page<T, P>, &[Page<T, P>]) -> Option<P> + Send + Sync + 'static,
    {
        self.get_previous_page_param = Some(Arc::new(get_previous_page_param));
        self
    }
}

/// A snapshot of an infinite query's state.
#[derive(Debug, Clone)]
pub struct InfiniteQueryState<T, P> {
    pub status: QueryStatus,
    /// The fetched pages, in order.
    pub pages: Vec<Page<T, P>>,
    /// Set only while `status` is [`QueryStatus::Error`].
    pub error: Option<QueryError>,
    pub is_stale: bool,
    pub last_fetched_at: Option<Instant>,
    /// Whether the next-cursor hook produced a cursor for the current tail.
    pub has_next_page: bool,
    pub is_fetching_next_page: bool,
    pub is_fetching_previous_page: bool,
}

impl<T, P> InfiniteQueryState<T, P> {
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            status: QueryStatus::Idle,
            pages: Vec::new(),
            error: None,
            is_stale: false,
            last_fetched_at: None,
            has_next_page: false,
            is_fetching_next_page: false,
            is_fetching_previous_page: false,
        }
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

impl<T, P> Default for InfiniteQueryState<T, P> {
    fn default() -> Self {
        Self::idle()
    }
}

struct InfiniteShared<T, P> {
    key: QueryKey,
    canonical: String,
    fetcher: PageFetcher<T, P>,
    pagination: Pagination<T, P>,
    config: QueryConfig,
    cache: Arc<CacheStore>,
    state: watch::Sender<InfiniteQueryState<T, P>>,
    first_in_flight: AtomicBool,
    next_in_flight: AtomicBool,
    prev_in_flight: AtomicBool,
    disposed: AtomicBool,
    cancel: CancellationToken,
}

/// Per-key state machine for a cursor-paginated query.
pub struct InfiniteQueryEngine<T, P> {
    inner: Arc<InfiniteShared<T, P>>,
}

impl<T, P> Clone for InfiniteQueryEngine<T, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, P> InfiniteQueryEngine<T, P>
where
    T: QueryData,
    P: QueryData,
{
    pub(crate) fn new(
        key: QueryKey,
        fetcher: PageFetcher<T, P>,
        pagination: Pagination<T, P>,
        config: QueryConfig,
        cache: Arc<CacheStore>,
    ) -> Self {
        let canonical = key.canonical();
        let (state, _) = watch::channel(InfiniteQueryState::idle());
        Self {
            inner: Arc::new(InfiniteShared {
                key,
                canonical,
                fetcher,
                pagination,
                config,
                cache,
                state,
                first_in_flight: AtomicBool::new(false),
                next_in_flight: AtomicBool::new(false),
                prev_in_flight: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub(crate) fn start(&self, monitor: &NetworkMonitor) {
        let engine = self.clone();
        tokio::spawn(async move { engine.init().await });

        if self.inner.config.refetch_on_reconnect {
            self.spawn_network_watcher(monitor);
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.inner.key
    }

    pub fn canonical_key(&self) -> &str {
        &self.inner.canonical
    }

    pub fn config(&self) -> &QueryConfig {
        &self.inner.config
    }

    /// The current state, with staleness recomputed against the clock.
    pub fn state(&self) -> InfiniteQueryState<T, P> {
        let mut state = self.inner.state.borrow().clone();
        state.is_stale = state.compute_stale(self.inner.config.stale_time);
        state
    }

    pub fn subscribe(&self) -> watch::Receiver<InfiniteQueryState<T, P>> {
        self.inner.state.subscribe()
    }

    /// The state changes as a stream; the first item is the current state.
    pub fn watch(&self) -> WatchStream<InfiniteQueryState<T, P>> {
        WatchStream::new(self.subscribe())
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Fetches the first page if needed, replacing the whole sequence.
    pub async fn fetch(&self, force: bool) {
        if self.is_disposed() || !self.inner.config.enabled {
            return;
        }
        if !force {
            let state = self.inner.state.borrow();
            if state.is_loading() {
                return;
            }
            if !state.pages.is_empty() && !state.compute_stale(self.inner.config.stale_time) {
                return;
            }
        }
        self.run_first_fetch(false).await;
    }

    /// Forces a first-page fetch; existing pages stay visible while it
    /// loads, then the sequence is replaced.
    pub async fn refetch(&self) {
        self.fetch(true).await;
    }

    /// Fetches the page after the current tail and appends it.
    ///
    /// No-op when there is no next page or a next-page fetch is already in
    /// flight. On failure the fetched pages stay intact; the error is
    /// surfaced and the sequence is marked stale.
    pub async fn fetch_next_page(&self) {
        if self.is_disposed() || !self.inner.config.enabled {
            return;
        }
        let param = {
            let state = self.inner.state.borrow();
            if !state.has_next_page || state.is_fetching_next_page {
                return;
            }
            match state.pages.last() {
                Some(last) => (self.inner.pagination.get_next_page_param)(last, &state.pages),
                None => return,
            }
        };
        let Some(param) = param else {
            self.emit(|state| state.has_next_page = false);
            return;
        };

        if self
            .inner
            .next_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.emit(|state| state.is_fetching_next_page = true);

        let fetcher = self.inner.fetcher.clone();
        let cursor = param.clone();
        let policy = RetryPolicy::from(&self.inner.config);
        let result = policy
            .run(move || fetcher(Some(cursor.clone())), &self.inner.cancel)
            .await;

        match result {
            Ok(data) => {
                let page = Page {
                    data,
                    page_param: Some(param),
                };
                let next_hook = self.inner.pagination.get_next_page_param.clone();
                self.emit(move |state| {
                    state.pages.push(page);
                    let has_next = state
                        .pages
                        .last()
                        .is_some_and(|last| next_hook(last, &state.pages).is_some());
                    state.has_next_page = has_next;
                    state.is_fetching_next_page = false;
                    state.status = QueryStatus::Success;
                    state.error = None;
                    state.is_stale = false;
                    state.last_fetched_at = Some(Instant::now());
                });
                self.write_pages_to_cache();
            }
            Err(source) => {
                let error = QueryError {
                    key: self.inner.canonical.clone(),
                    source,
                };
                tracing::warn!(%error, "next-page fetch failed");
                self.emit(move |state| {
                    state.is_fetching_next_page = false;
                    state.status = QueryStatus::Error;
                    state.error = Some(error);
                    state.is_stale = true;
                });
            }
        }

        self.inner.next_in_flight.store(false, Ordering::SeqCst);
    }

    /// Fetches the page before the current head and prepends it.
    ///
    /// No-op unless a previous-cursor hook was configured.
    pub async fn fetch_previous_page(&self) {
        if self.is_disposed() || !self.inner.config.enabled {
            return;
        }
        let Some(prev_hook) = self.inner.pagination.get_previous_page_param.clone() else {
            return;
        };
        let param = {
            let state = self.inner.state.borrow();
            if state.is_fetching_previous_page {
                return;
            }
            match state.pages.first() {
                Some(first) => prev_hook(first, &state.pages),
                None => return,
            }
        };
        let Some(param) = param else {
            return;
        };

        if self
            .inner
            .prev_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.emit(|state| state.is_fetching_previous_page = true);

        let fetcher = self.inner.fetcher.clone();
        let cursor = param.clone();
        let policy = RetryPolicy::from(&self.inner.config);
        let result = policy
            .run(move || fetcher(Some(cursor.clone())), &self.inner.cancel)
            .await;

        match result {
            Ok(data) => {
                let page = Page {
                    data,
                    page_param: Some(param),
                };
                self.emit(move |state| {
                    state.pages.insert(0, page);
                    state.is_fetching_previous_page = false;
                    state.status = QueryStatus::Success;
                    state.error = None;
                    state.is_stale = false;
                    state.last_fetched_at = Some(Instant::now());
                });
                self.write_pages_to_cache();
            }
            Err(source) => {
                let error = QueryError {
                    key: self.inner.canonical.clone(),
                    source,
                };
                tracing::warn!(%error, "previous-page fetch failed");
                self.emit(move |state| {
                    state.is_fetching_previous_page = false;
                    state.status = QueryStatus::Error;
                    state.error = Some(error);
                    state.is_stale = true;
                });
            }
        }

        self.inner.prev_in_flight.store(false, Ordering::SeqCst);
    }

    /// Clears the cache entry and the page sequence, then fetches the
    /// first page.
    ///
    /// Unlike [`refetch`](Self::refetch), previously fetched depth is
    /// gone immediately; paginate forward again to restore it.
    pub async fn refresh(&self) {
        if self.is_disposed() {
            return;
        }
        self.inner.cache.remove(&self.inner.canonical);
        self.emit(|state| *state = InfiniteQueryState::idle());
        if self.inner.config.enabled {
            self.run_first_fetch(false).await;
        }
    }

    /// Resets the query and refetches the first page if enabled.
    pub async fn invalidate(&self, remove_cache: bool) {
        if self.is_disposed() {
            return;
        }
        if remove_cache {
            self.inner.cache.remove(&self.inner.canonical);
        }
        self.emit(|state| *state = InfiniteQueryState::idle());
        if self.inner.config.enabled {
            self.fetch(false).await;
        }
    }

    /// Host-delivered focus signal: refetches the first page when
    /// configured and stale.
    pub async fn notify_focus(&self) {
        if self.is_disposed() || !self.inner.config.refetch_on_focus {
            return;
        }
        if self.state().is_stale {
            self.refetch().await;
        }
    }

    /// Stops this engine; see [`QueryEngine::dispose`](crate::query::QueryEngine::dispose).
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.cancel.cancel();
        tracing::debug!(key = %self.inner.canonical, "infinite query engine disposed");
    }

    async fn init(&self) {
        if self.is_disposed() {
            return;
        }
        match self.inner.cache.get::<Vec<Page<T, P>>>(&self.inner.canonical) {
            Some(entry) => {
                let stale = entry.is_stale(self.inner.config.stale_time);
                let fetched_at = entry.inserted_at;
                let pages = entry.data;
                let has_next = pages
                    .last()
                    .is_some_and(|last| (self.inner.pagination.get_next_page_param)(last, &pages).is_some());
                self.emit(move |state| {
                    *state = InfiniteQueryState {
                        status: QueryStatus::Success,
                        pages,
                        error: None,
                        is_stale: stale,
                        last_fetched_at: Some(fetched_at),
                        has_next_page: has_next,
                        is_fetching_next_page: false,
                        is_fetching_previous_page: false,
                    };
                });
                if stale && self.inner.config.enabled {
                    // first page only; restored depth is not replayed
                    self.run_first_fetch(true).await;
                }
            }
            None => {
                if self.inner.config.enabled {
                    self.fetch(false).await;
                }
            }
        }
    }

    async fn run_first_fetch(&self, background: bool) {
        if self
            .inner
            .first_in_flight
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
        let cursor = self.inner.pagination.initial_page_param.clone();
        let policy = RetryPolicy::from(&self.inner.config);
        let result = policy
            .run(move || fetcher(cursor.clone()), &self.inner.cancel)
            .await;

        match result {
            Ok(data) => {
                let page = Page {
                    data,
                    page_param: self.inner.pagination.initial_page_param.clone(),
                };
                let next_hook = self.inner.pagination.get_next_page_param.clone();
                self.emit(move |state| {
                    let pages = vec![page];
                    let has_next = pages
                        .last()
                        .is_some_and(|last| next_hook(last, &pages).is_some());
                    *state = InfiniteQueryState {
                        status: QueryStatus::Success,
                        pages,
                        error: None,
                        is_stale: false,
                        last_fetched_at: Some(Instant::now()),
                        has_next_page: has_next,
                        is_fetching_next_page: false,
                        is_fetching_previous_page: false,
                    };
                });
                self.write_pages_to_cache();
            }
            Err(source) => {
                let error = QueryError {
                    key: self.inner.canonical.clone(),
                    source,
                };
                tracing::warn!(%error, "first-page fetch failed");
                self.emit(move |state| {
                    state.status = QueryStatus::Error;
                    state.error = Some(error);
                    state.is_stale = true;
                });
            }
        }

        self.inner.first_in_flight.store(false, Ordering::SeqCst);
    }

    fn write_pages_to_cache(&self) {
        let pages = self.inner.state.borrow().pages.clone();
        self.inner.cache.set(
            &self.inner.canonical,
            pages,
            Some(self.inner.config.cache_time),
        );
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
        F: FnOnce(&mut InfiniteQueryState<T, P>),
    {
        if self.is_disposed() {
            tracing::debug!(key = %self.inner.canonical, "emission dropped after dispose");
            return;
        }
        self.inner.state.send_modify(apply);
    }
}
