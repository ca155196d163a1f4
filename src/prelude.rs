//! Prelude module for convenient imports.
//!
//! ```
//! use refetch::prelude::*;
//! ```
//!
//! # What's included
//!
//! - [`QueryRegistry`] - The entry point binding keys to engines
//! - [`QueryConfig`] / [`MutationConfig`] - Behavior configuration
//! - [`QueryKey`] - Canonical query identity
//! - Engine handles and their state types
//! - [`FetchError`] and the error domains

pub use crate::cache::{CacheStore, DurableStore, MemoryStore};
pub use crate::config::QueryConfig;
pub use crate::error::{FetchError, MutationError, QueryError, RegistryError};
pub use crate::infinite::{InfiniteQueryEngine, InfiniteQueryState, Page, Pagination};
pub use crate::key::{KeyPart, QueryKey};
pub use crate::mutation::{MutationConfig, MutationEngine, MutationState, MutationStatus};
pub use crate::network::{NetworkMonitor, NetworkStatus};
pub use crate::query::{QueryEngine, QueryState, QueryStatus};
pub use crate::registry::QueryRegistry;
