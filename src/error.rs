//! Error types for queries, mutations and the durable cache tier.
//!
//! Failures live in two externally visible domains: [`QueryError`] for
//! failed fetches and [`MutationError`] for failed mutations. Both wrap a
//! [`FetchError`], which is what fetchers and mutation functions return.
//! Durable-tier failures ([`StoreError`]) never escape the cache store;
//! they are logged and the store degrades to memory-only behavior.

use std::time::Duration;

use thiserror::Error;

/// Error type returned by fetchers and mutation functions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The operation itself failed (bad response, decode failure, ...).
    #[error("fetch failed: {0}")]
    Failed(String),

    /// The operation could not reach its target.
    #[error("network error: {0}")]
    Network(String),

    /// The operation exceeded its configured deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// A fetch failure attributed to the query it occurred on.
///
/// Carried inside [`QueryState`](crate::query::QueryState) once retries are
/// exhausted; `key` is the canonical key of the failing query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("query `{key}` failed: {source}")]
pub struct QueryError {
    /// Canonical key of the query that failed.
    pub key: String,
    /// The underlying fetch failure.
    #[source]
    pub source: FetchError,
}

/// A mutation failure attributed to the mutation and its input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("mutation `{name}` failed for {variables}: {source}")]
pub struct MutationError {
    /// Name the mutation was registered under.
    pub name: String,
    /// Debug rendering of the variables the mutation was called with.
    pub variables: String,
    /// The underlying failure.
    #[source]
    pub source: FetchError,
}

/// Errors from the registry surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// An engine already exists under this key but with a different data type.
    #[error("engine for key `{key}` exists with a different type")]
    TypeMismatch {
        /// Canonical key of the conflicting engine.
        key: String,
    },

    /// The registry has been disposed and no longer hands out engines.
    #[error("registry has been disposed")]
    Disposed,
}
