//! The durable-tier contract and a reference in-memory implementation.
//!
//! No storage technology is mandated; hosts bring their own backend
//! (a file, an embedded database, platform key-value storage) by
//! implementing [`DurableStore`]. The tier is a warm-restart aid only:
//! every failure is survivable and the cache degrades to memory-only.

use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error raised by a durable-tier operation.
///
/// These never propagate past [`CacheStore`](super::CacheStore); they are
/// logged and the operation degrades to the memory tier.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The value could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The backend could not be read or written.
    #[error("storage I/O failed: {0}")]
    Io(String),
}

/// The wire shape of a durable-tier record.
///
/// Values are stored as JSON alongside the wall-clock write time so that
/// staleness survives a process restart; `ttl_ms` carries the advisory
/// retention period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub value: serde_json::Value,
    pub written_at_ms: u64,
    pub ttl_ms: Option<u64>,
}

impl StoredEntry {
    /// Creates a record stamped with the current wall-clock time.
    pub fn new(value: serde_json::Value, ttl_ms: Option<u64>) -> Self {
        Self {
            value,
            written_at_ms: unix_now_ms(),
            ttl_ms,
        }
    }

    /// Milliseconds elapsed since the record was written.
    pub fn age_ms(&self) -> u64 {
        unix_now_ms().saturating_sub(self.written_at_ms)
    }
}

pub(crate) fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// Contract for the durable cache tier.
///
/// Implementations must be safe to call from multiple tasks. Operations are
/// synchronous; backends with async APIs should bridge internally (the
/// caller treats every call as best-effort and will not retry).
pub trait DurableStore: Send + Sync {
    /// Reads the record stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<StoredEntry>, StoreError>;

    /// Writes `entry` under `key`, replacing any previous record.
    fn put(&self, key: &str, entry: &StoredEntry) -> Result<(), StoreError>;

    /// Deletes the record under `key`; deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Removes every record.
    fn clear(&self) -> Result<(), StoreError>;
}

/// An in-memory [`DurableStore`].
///
/// Useful in tests and for simulating warm restarts; it persists nothing
/// across processes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, StoredEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        Ok(self.records.get(key).map(|record| record.value().clone()))
    }

    fn put(&self, key: &str, entry: &StoredEntry) -> Result<(), StoreError> {
        self.records.insert(key.to_string(), entry.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.records.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.records.clear();
        Ok(())
    }
}
