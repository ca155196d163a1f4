use std::time::{Duration, Instant};

/// A cached value with its insertion time and an optional advisory TTL.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub inserted_at: Instant,
    pub ttl: Option<Duration>,
}

impl<T> CacheEntry<T> {
    /// Creates a new entry without a TTL.
    pub fn new(data: T) -> Self {
        Self {
            data,
            inserted_at: Instant::now(),
            ttl: None,
        }
    }

    /// Creates a new entry with an advisory TTL.
    pub fn with_ttl(data: T, ttl: Duration) -> Self {
        Self {
            data,
            inserted_at: Instant::now(),
            ttl: Some(ttl),
        }
    }

    /// Time elapsed since the entry was inserted.
    pub fn age(&self) -> Duration {
        self.inserted_at.elapsed()
    }

    /// Whether this entry is stale for the given stale time.
    pub fn is_stale(&self, stale_time: Duration) -> bool {
        self.age() > stale_time
    }

    /// Whether this entry has outlived its TTL.
    ///
    /// Advisory only: nothing sweeps expired entries, explicit removal is
    /// the only eviction path.
    pub fn should_evict(&self) -> bool {
        self.ttl.is_some_and(|ttl| self.age() > ttl)
    }

    /// Replaces the value, resetting the insertion time.
    pub fn update(&mut self, data: T) {
        self.data = data;
        self.inserted_at = Instant::now();
    }
}
