//! Two-tier cache: authoritative in-memory tier plus a best-effort durable
//! tier for warm restarts.
//!
//! The memory tier is a concurrent map of type-erased [`CacheEntry`] values
//! and is the source of truth at runtime. The durable tier sits behind the
//! [`DurableStore`] contract; reads promote durable hits into memory, writes
//! are fire-and-forget, and any serialization or I/O failure is logged and
//! swallowed — the store then behaves as memory-only.

mod durable;
mod entry;
mod store;

pub use durable::{DurableStore, MemoryStore, StoreError, StoredEntry};
pub use entry::CacheEntry;
pub use store::CacheStore;
