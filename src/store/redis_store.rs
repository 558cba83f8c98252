use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use super::{CounterSnapshot, CounterStore, StoreConnector};
use crate::error::StoreError;

/// Increment-with-window in one round trip.
///
/// The expiry is (re)armed when the key is new or has somehow lost its TTL,
/// so a counter can never live forever.
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('TTL', KEYS[1])
if count == 1 or ttl < 0 then
  redis.call('EXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

/// Redis-backed counter store.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection_manager: ConnectionManager,
}

impl RedisCounterStore {
    /// Connect to `url` and verify the connection with `PING`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| {
            warn!("Failed to create Redis client: {}", e);
            StoreError::Connection(format!("Failed to create Redis client: {}", e))
        })?;

        let connection_manager = ConnectionManager::new(client).await.map_err(|e| {
            warn!("Failed to create Redis connection manager: {}", e);
            StoreError::Connection(format!("Failed to create connection manager: {}", e))
        })?;

        let mut conn = connection_manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to ping Redis: {}", e)))?;

        debug!("Connected to Redis counter store");

        Ok(Self { connection_manager })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window_secs: u64) -> Result<CounterSnapshot, StoreError> {
        let mut conn = self.connection_manager.clone();

        let (count, ttl): (i64, i64) = redis::cmd("EVAL")
            .arg(INCREMENT_SCRIPT)
            .arg(1)
            .arg(key)
            .arg(window_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Command(format!("Redis EVAL error: {}", e)))?;

        if count < 1 {
            return Err(StoreError::UnexpectedReply(format!(
                "counter for {} is {}",
                key, count
            )));
        }

        Ok(CounterSnapshot {
            count: count as u64,
            ttl_secs: ttl.max(0) as u64,
        })
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

/// Connector producing [`RedisCounterStore`] instances.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    url: String,
}

impl RedisConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl StoreConnector for RedisConnector {
    async fn connect(&self) -> Result<Arc<dyn CounterStore>, StoreError> {
        let store = RedisCounterStore::connect(&self.url).await?;
        Ok(Arc::new(store))
    }

    fn target(&self) -> String {
        redact_url(&self.url)
    }
}

/// Strip credentials from a store URL before logging it.
pub fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}
