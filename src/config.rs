//! Configuration for query behavior.

use std::time::Duration;

/// Controls how a query caches data, when it considers it stale, and how
/// fetch failures are retried.
///
/// Overrides follow the builder pattern: start from [`QueryConfig::default`]
/// (or [`QueryConfig::new`] for the two cache knobs) and chain `with_*`
/// calls; any field left untouched keeps its default.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// How long data is considered fresh before becoming stale.
    ///
    /// While data is fresh, queries serve the cached value without
    /// refetching. Once stale, the cached value is still served but a
    /// background refetch is triggered.
    pub stale_time: Duration,

    /// Advisory retention period for cached data.
    ///
    /// Entries are stamped with this TTL, but no background sweep removes
    /// them; only explicit invalidation or removal clears an entry.
    pub cache_time: Duration,

    /// How many times a failed fetch is retried after the first attempt.
    pub retry_count: u32,

    /// Base delay between retries; the delay before retry `n` is
    /// `retry_delay * n`.
    pub retry_delay: Duration,

    /// Refetch stale data when connectivity returns after an offline period.
    pub refetch_on_reconnect: bool,

    /// Refetch stale data when the host application regains focus.
    ///
    /// The engine only reacts to the signal; delivering it is the host's
    /// job (see [`QueryRegistry::notify_focus`](crate::registry::QueryRegistry::notify_focus)).
    pub refetch_on_focus: bool,

    /// Disabled queries never fetch; state can still be seeded via
    /// `set_data`.
    pub enabled: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(0),      // immediately stale
            cache_time: Duration::from_secs(5 * 60), // 5 minutes
            retry_count: 3,
            retry_delay: Duration::from_secs(1),
            refetch_on_reconnect: true,
            refetch_on_focus: false,
            enabled: true,
        }
    }
}

impl QueryConfig {
    /// Creates a configuration with the given stale and cache times; the
    /// remaining fields keep their defaults.
    #[must_use]
    pub fn new(stale_time: Duration, cache_time: Duration) -> Self {
        Self {
            stale_time,
            cache_time,
            ..Self::default()
        }
    }

    /// Sets the stale time.
    #[must_use]
    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    /// Sets the advisory cache retention period.
    #[must_use]
    pub fn with_cache_time(mut self, cache_time: Duration) -> Self {
        self.cache_time = cache_time;
        self
    }

    /// Sets the retry count and base retry delay.
    #[must_use]
    pub fn with_retry(mut self, retry_count: u32, retry_delay: Duration) -> Self {
        self.retry_count = retry_count;
        self.retry_delay = retry_delay;
        self
    }

    /// Enables or disables refetch-on-reconnect.
    #[must_use]
    pub fn with_refetch_on_reconnect(mut self, refetch: bool) -> Self {
        self.refetch_on_reconnect = refetch;
        self
    }

    /// Enables or disables refetch-on-focus.
    #[must_use]
    pub fn with_refetch_on_focus(mut self, refetch: bool) -> Self {
        self.refetch_on_focus = refetch;
        self
    }

    /// Enables or disables the query.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}
