use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::{CounterSnapshot, CounterStore, StoreConnector};
use crate::error::StoreError;

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: u64,
    expires_at: Instant,
}

/// In-process counter store for development and single-instance deployments.
///
/// Counters are not shared between processes. Expiry uses tokio's clock, so
/// tests can drive windows with paused time.
#[derive(Default)]
pub struct InMemoryCounterStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop counters whose window has elapsed.
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.expires_at > now);
        debug!(remaining = entries.len(), "Cleaned up in-memory counters");
    }

    /// Number of live counters.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str, window_secs: u64) -> Result<CounterSnapshot, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let entry = entries.entry(key.to_string()).or_insert(Entry {
            count: 0,
            expires_at: now + Duration::from_secs(window_secs),
        });

        if entry.expires_at <= now {
            entry.count = 0;
            entry.expires_at = now + Duration::from_secs(window_secs);
        }

        entry.count += 1;

        // Round up so a caller is never told to retry before the reset.
        let remaining = entry.expires_at.saturating_duration_since(now);
        let ttl_secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);

        Ok(CounterSnapshot {
            count: entry.count,
            ttl_secs,
        })
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Connector that always hands out the same in-memory store.
#[derive(Clone, Default)]
pub struct InMemoryConnector {
    store: Arc<InMemoryCounterStore>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store this connector hands out.
    pub fn store(&self) -> Arc<InMemoryCounterStore> {
        Arc::clone(&self.store)
    }
}

#[async_trait]
impl StoreConnector for InMemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn CounterStore>, StoreError> {
        Ok(self.store.clone())
    }

    fn target(&self) -> String {
        "memory://local".to_string()
    }
}
