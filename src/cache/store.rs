use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::durable::{DurableStore, StoredEntry};
use super::entry::CacheEntry;

/// Two-tier key/value store: memory first, durable second.
///
/// The memory tier is authoritative at runtime and stores entries
/// type-erased, one concrete type per key. The durable tier (if configured)
/// is consulted on memory misses; hits are promoted into memory with their
/// original insertion age so staleness carries across a restart.
///
/// Durable failures never propagate: a store without a working backend
/// behaves exactly like a memory-only store.
pub struct CacheStore {
    memory: DashMap<String, Box<dyn Any + Send + Sync>>,
    durable: Option<Arc<dyn DurableStore>>,
}

impl CacheStore {
    /// Creates a memory-only store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            memory: DashMap::new(),
            durable: None,
        }
    }

    /// Creates a store backed by the given durable tier.
    #[must_use]
    pub fn with_durable(durable: Arc<dyn DurableStore>) -> Self {
        Self {
            memory: DashMap::new(),
            durable: Some(durable),
        }
    }

    /// Reads the entry under `key`, promoting a durable hit into memory.
    ///
    /// A memory entry of a different concrete type is a caller bug; it is
    /// logged and reads as a miss rather than panicking.
    pub fn get<T>(&self, key: &str) -> Option<CacheEntry<T>>
    where
        T: Clone + DeserializeOwned + Send + Sync + 'static,
    {
        if let Some(entry) = self.memory.get(key) {
            return match entry.downcast_ref::<CacheEntry<T>>() {
                Some(entry) => Some(entry.clone()),
                None => {
                    tracing::warn!(key, "cached entry has a different type, treating as miss");
                    None
                }
            };
        }

        let durable = self.durable.as_ref()?;
        let stored = match durable.get(key) {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(error) => {
                tracing::warn!(key, %error, "durable read failed");
                return None;
            }
        };

        match serde_json::from_value::<T>(stored.value.clone()) {
            Ok(data) => {
                let entry = CacheEntry {
                    data,
                    // carry the original write time forward so staleness
                    // survives the restart
                    inserted_at: Instant::now()
                        .checked_sub(Duration::from_millis(stored.age_ms()))
                        .unwrap_or_else(Instant::now),
                    ttl: stored.ttl_ms.map(Duration::from_millis),
                };
                self.memory.insert(key.to_string(), Box::new(entry.clone()));
                tracing::debug!(key, "promoted durable entry into memory");
                Some(entry)
            }
            Err(error) => {
                tracing::warn!(key, %error, "durable entry failed to decode, treating as miss");
                None
            }
        }
    }

    /// Writes `data` under `key` with an optional advisory TTL.
    ///
    /// The memory tier is always written; the durable write is best-effort.
    pub fn set<T>(&self, key: &str, data: T, ttl: Option<Duration>)
    where
        T: Clone + Serialize + Send + Sync + 'static,
    {
        let entry = CacheEntry {
            data: data.clone(),
            inserted_at: Instant::now(),
            ttl,
        };
        self.memory.insert(key.to_string(), Box::new(entry));

        if let Some(durable) = &self.durable {
            match serde_json::to_value(&data) {
                Ok(value) => {
                    let ttl_ms = ttl.map(|t| t.as_millis() as u64);
                    let stored = StoredEntry::new(value, ttl_ms);
                    if let Err(error) = durable.put(key, &stored) {
                        tracing::warn!(key, %error, "durable write failed");
                    }
                }
                Err(error) => {
                    tracing::warn!(key, %error, "value failed to serialize for durable tier");
                }
            }
        }
    }

    /// Removes the entry under `key` from both tiers.
    pub fn remove(&self, key: &str) {
        self.memory.remove(key);
        if let Some(durable) = &self.durable {
            if let Err(error) = durable.delete(key) {
                tracing::warn!(key, %error, "durable delete failed");
            }
        }
    }

    /// Removes every entry from both tiers.
    pub fn clear(&self) {
        self.memory.clear();
        if let Some(durable) = &self.durable {
            if let Err(error) = durable.clear() {
                tracing::warn!(%error, "durable clear failed");
            }
        }
    }

    /// Whether either tier holds an entry under `key`.
    pub fn has(&self, key: &str) -> bool {
        if self.memory.contains_key(key) {
            return true;
        }
        self.durable
            .as_ref()
            .is_some_and(|durable| matches!(durable.get(key), Ok(Some(_))))
    }

    /// Number of entries in the memory tier.
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}
