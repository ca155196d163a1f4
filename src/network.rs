//! Connectivity monitoring contract.
//!
//! The engine never probes connectivity itself; the host feeds status
//! changes into a [`NetworkMonitor`] and engines consume the transitions.
//! Queries configured with `refetch_on_reconnect` refetch stale data when
//! the status goes from [`NetworkStatus::Offline`] to
//! [`NetworkStatus::Online`].
//!
//! # Example
//!
//! ```
//! use refetch::network::{NetworkMonitor, NetworkStatus};
//!
//! let monitor = NetworkMonitor::new();
//! assert_eq!(monitor.status(), NetworkStatus::Unknown);
//!
//! // the host's connectivity detector drives this
//! monitor.set_status(NetworkStatus::Online);
//! assert_eq!(monitor.status(), NetworkStatus::Online);
//! ```

use std::sync::Arc;

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Current connectivity as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkStatus {
    /// No report received yet.
    #[default]
    Unknown,
    Online,
    Offline,
}

/// Shared connectivity state with a subscribable change stream.
///
/// Cloning is cheap and every clone observes the same state; construct one
/// at application startup and hand it to the registry.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    tx: Arc<watch::Sender<NetworkStatus>>,
}

impl NetworkMonitor {
    /// Creates a monitor in the [`NetworkStatus::Unknown`] state.
    #[must_use]
    pub fn new() -> Self {
        Self::with_status(NetworkStatus::Unknown)
    }

    /// Creates a monitor with a known initial status.
    #[must_use]
    pub fn with_status(status: NetworkStatus) -> Self {
        let (tx, _rx) = watch::channel(status);
        Self { tx: Arc::new(tx) }
    }

    /// The current status.
    pub fn status(&self) -> NetworkStatus {
        *self.tx.borrow()
    }

    /// Publishes a new status; subscribers only wake on actual changes.
    pub fn set_status(&self, status: NetworkStatus) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            tracing::debug!(current = ?status, "network status changed");
        }
    }

    /// Subscribes to status changes.
    ///
    /// The receiver starts at the current status; use
    /// [`watch::Receiver::changed`] to await transitions.
    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.tx.subscribe()
    }

    /// The status changes as a stream, starting with the current status.
    pub fn stream(&self) -> WatchStream<NetworkStatus> {
        WatchStream::new(self.subscribe())
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}
