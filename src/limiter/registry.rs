//! Limiter registry with explicit readiness.
//!
//! The registry owns the policy table and, once connected, the counter store.
//! Connecting happens in the background: requests that arrive before the store
//! is installed are denied with [`AdmissionError::NotReady`] instead of being
//! waved through.
//!
//! ```text
//!   Initializing ──connect ok──▶ Ready
//!        │
//!   connect err
//!        ▼
//!   Retrying{n} ──connect ok──▶ Ready
//!        │
//!   max attempts
//!        ▼
//!     Failed
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{CallerIdentity, PolicyTable, Tier};
use crate::error::AdmissionError;
use crate::store::{CounterStore, StoreConnector};

/// Default key prefix for quota counters.
pub const DEFAULT_KEY_PREFIX: &str = "rate";

/// Default bound on a single admission round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Readiness
// =============================================================================

/// Connection state of the registry.
#[derive(Clone)]
pub enum LimiterState {
    /// No connection attempt has finished yet
    Initializing,

    /// At least one attempt failed; more will follow
    Retrying { attempts: u32, last_error: String },

    /// The store is installed and admissions are decided
    Ready(Arc<dyn CounterStore>),

    /// Connecting was abandoned; admissions are denied until restart
    Failed { attempts: u32, last_error: String },
}

impl LimiterState {
    pub fn readiness(&self) -> Readiness {
        match self {
            LimiterState::Initializing => Readiness::Initializing,
            LimiterState::Retrying { .. } => Readiness::Retrying,
            LimiterState::Ready(_) => Readiness::Ready,
            LimiterState::Failed { .. } => Readiness::Failed,
        }
    }
}

impl fmt::Debug for LimiterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterState::Initializing => write!(f, "Initializing"),
            LimiterState::Retrying {
                attempts,
                last_error,
            } => write!(f, "Retrying(attempts={}, last_error={})", attempts, last_error),
            LimiterState::Ready(store) => write!(f, "Ready({})", store.backend()),
            LimiterState::Failed {
                attempts,
                last_error,
            } => write!(f, "Failed(attempts={}, last_error={})", attempts, last_error),
        }
    }
}

/// Store-free view of [`LimiterState`] for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Initializing,
    Retrying,
    Ready,
    Failed,
}

impl Readiness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Readiness::Initializing => "initializing",
            Readiness::Retrying => "retrying",
            Readiness::Ready => "ready",
            Readiness::Failed => "failed",
        }
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Retry Policy
// =============================================================================

/// Backoff schedule for background store initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,

    /// Give up after this many attempts (None = keep trying)
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, doubling from `initial_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

// =============================================================================
// Admission
// =============================================================================

/// A successful admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub tier: Tier,

    /// Calls left in the current window after this one
    pub remaining: u32,

    /// Seconds until the window resets
    pub reset_after_secs: u64,
}

// =============================================================================
// Registry
// =============================================================================

/// Tiered rate limiter with observable readiness.
///
/// Shared by reference (`Arc`) between the background initializer and every
/// request that needs an admission decision.
pub struct LimiterRegistry {
    policies: PolicyTable,
    key_prefix: String,
    store_timeout: Duration,
    state: watch::Sender<LimiterState>,
}

impl LimiterRegistry {
    /// Create a registry with no store yet.
    pub fn new(policies: PolicyTable) -> Self {
        let (state, _) = watch::channel(LimiterState::Initializing);
        Self {
            policies,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            state,
        }
    }

    /// Create a registry that is ready immediately.
    pub fn with_store(policies: PolicyTable, store: Arc<dyn CounterStore>) -> Self {
        let registry = Self::new(policies);
        registry.install(store);
        registry
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Current connection state.
    pub fn state(&self) -> LimiterState {
        self.state.borrow().clone()
    }

    pub fn readiness(&self) -> Readiness {
        self.state.borrow().readiness()
    }

    pub fn is_ready(&self) -> bool {
        self.readiness() == Readiness::Ready
    }

    /// Install a connected store, making the registry ready.
    pub fn install(&self, store: Arc<dyn CounterStore>) {
        info!(backend = store.backend(), "Rate limiter ready");
        self.state.send_replace(LimiterState::Ready(store));
    }

    /// Wait until the registry is ready, up to `timeout`.
    ///
    /// Returns `false` if the timeout elapsed or initialization failed for good.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.state.subscribe();
        let wait = rx.wait_for(|state| {
            matches!(state, LimiterState::Ready(_) | LimiterState::Failed { .. })
        });
        let ready = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(state)) => matches!(*state, LimiterState::Ready(_)),
            _ => false,
        };
        ready
    }

    /// Connect in the background, retrying with backoff until connected.
    ///
    /// Never blocks the caller; admissions are denied until the store is
    /// installed.
    pub fn spawn_initializer<C>(self: &Arc<Self>, connector: C, retry: RetryPolicy) -> JoinHandle<()>
    where
        C: StoreConnector + 'static,
    {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            registry.initialize(&connector, retry).await;
        })
    }

    /// Connect, retrying with backoff. Returns once ready or failed for good.
    pub async fn initialize<C>(&self, connector: &C, retry: RetryPolicy)
    where
        C: StoreConnector + ?Sized,
    {
        let target = connector.target();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            debug!(store = %target, attempt = attempts, "Connecting to counter store");

            match connector.connect().await {
                Ok(store) => {
                    self.install(store);
                    return;
                }
                Err(e) => {
                    let last_error = e.to_string();

                    if retry.max_attempts.is_some_and(|max| attempts >= max) {
                        error!(
                            store = %target,
                            attempts,
                            "Giving up on counter store: {}",
                            last_error
                        );
                        self.state.send_replace(LimiterState::Failed {
                            attempts,
                            last_error,
                        });
                        return;
                    }

                    let delay = retry.backoff(attempts);
                    warn!(
                        store = %target,
                        attempt = attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        "Counter store unavailable: {}",
                        last_error
                    );
                    self.state.send_replace(LimiterState::Retrying {
                        attempts,
                        last_error,
                    });
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Counter key for an identity: `{prefix}:{tier}:{identity}`.
    pub fn counter_key(&self, identity: &CallerIdentity) -> String {
        format!(
            "{}:{}:{}",
            self.key_prefix,
            identity.tier(),
            identity.limiter_key()
        )
    }

    /// Consume one unit of the caller's quota.
    ///
    /// Fails closed: a missing store, a store error or a store timeout all deny
    /// the request with a fault distinct from quota exhaustion.
    pub async fn admit(&self, identity: &CallerIdentity) -> Result<Admission, AdmissionError> {
        let store = match self.state() {
            LimiterState::Ready(store) => store,
            other => {
                warn!(state = ?other, "Admission attempted before the rate limiter is ready");
                return Err(AdmissionError::NotReady {
                    state: other.readiness().to_string(),
                });
            }
        };

        let tier = identity.tier();
        let policy = self.policies.get(tier);
        let key = self.counter_key(identity);

        let snapshot = tokio::time::timeout(
            self.store_timeout,
            store.increment(&key, policy.window_secs()),
        )
        .await
        .map_err(|_| {
            error!(key = %key, "Counter store timed out, denying request");
            AdmissionError::StoreTimeout {
                timeout_ms: self.store_timeout.as_millis() as u64,
            }
        })??;

        if snapshot.count > u64::from(policy.allowance()) {
            let retry_after_secs = snapshot.ttl_secs.max(1);
            debug!(
                tier = %tier,
                key = %key,
                count = snapshot.count,
                retry_after_secs,
                "Quota exhausted"
            );
            return Err(AdmissionError::RateLimited {
                tier,
                retry_after_secs,
            });
        }

        let remaining = policy.allowance() - snapshot.count as u32;
        debug!(tier = %tier, key = %key, remaining, "Admitted");

        Ok(Admission {
            tier,
            remaining,
            reset_after_secs: snapshot.ttl_secs,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
