//! # Refetch - Asynchronous Data Fetching & Caching Runtime
//!
//! Refetch manages remote data the way SWR or TanStack Query do for the
//! web, as a plain tokio library: queries are per-key state machines with
//! built-in caching, request deduplication, retries, stale-while-revalidate
//! refreshing, optimistic mutations with rollback and cursor pagination.
//!
//! ## Core Components
//!
//! - [`QueryRegistry`](registry::QueryRegistry): the entry point; binds
//!   canonical keys to engine instances for its whole lifetime
//! - [`QueryEngine`](query::QueryEngine): single-value queries with
//!   caching, staleness tracking and automatic refetching
//! - [`InfiniteQueryEngine`](infinite::InfiniteQueryEngine): ordered,
//!   cursor-paginated sequences
//! - [`MutationEngine`](mutation::MutationEngine): writes with optimistic
//!   updates, rollback and post-success invalidation
//! - [`CacheStore`](cache::CacheStore): two-tier cache; authoritative
//!   memory tier over a best-effort durable tier
//! - [`NetworkMonitor`](network::NetworkMonitor): host-fed connectivity
//!   signal driving refetch-on-reconnect
//!
//! ## Example
//!
//! ```rust,no_run
//! use refetch::prelude::*;
//! use std::time::Duration;
//!
//! #[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
//! struct Todo {
//!     id: u32,
//!     title: String,
//! }
//!
//! async fn fetch_todos() -> Result<Vec<Todo>, FetchError> {
//!     // your HTTP client of choice
//!     Ok(vec![])
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = QueryRegistry::new();
//!
//!     let todos = registry.get_or_create_query(
//!         "todos",
//!         || Box::pin(fetch_todos()),
//!         QueryConfig::new(Duration::from_secs(30), Duration::from_secs(300)),
//!     )?;
//!
//!     // first item is the current state; later items follow every change
//!     let mut states = todos.watch();
//!     while let Some(state) = futures::StreamExt::next(&mut states).await {
//!         println!("{:?}: {} todo(s)", state.status, state.data.as_ref().map_or(0, Vec::len));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Design Inspiration
//!
//! The query/mutation/invalidation model follows SWR and TanStack Query;
//! everything here is runtime-agnostic library code over tokio primitives
//! (`watch` channels for state, one engine per key for deduplication).

pub mod cache;
pub mod config;
pub mod error;
pub mod infinite;
pub mod key;
pub mod mutation;
pub mod network;
pub mod prelude;
pub mod query;
pub mod registry;
pub mod retry;
