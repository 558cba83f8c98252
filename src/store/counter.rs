use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;

/// State of a windowed counter right after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Count after the increment (1 on the first hit of a window)
    pub count: u64,

    /// Seconds until the counter resets to zero
    pub ttl_secs: u64,
}

/// Atomic windowed counter backed by a shared store.
///
/// Implementations must make `increment` atomic across every process sharing
/// the store: the count and the window expiry are updated in a single step.
/// The window starts at the first increment after a reset and the store,
/// not the caller, enforces the reset.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` by one and return the new count and remaining window.
    ///
    /// When the key does not exist (or its window elapsed), it is created with
    /// a count of 1 and a time-to-live of `window_secs`.
    async fn increment(&self, key: &str, window_secs: u64) -> Result<CounterSnapshot, StoreError>;

    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;
}

/// Opens connections to a counter store.
///
/// Used by the limiter registry to (re)try initialization in the background
/// while the store is unreachable.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Establish and verify a connection.
    async fn connect(&self) -> Result<Arc<dyn CounterStore>, StoreError>;

    /// Human-readable target (e.g. the store URL without credentials).
    fn target(&self) -> String;
}
