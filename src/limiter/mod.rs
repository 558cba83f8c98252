//! Tiered rate limiting.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      Request Gate                        │
//! └────────────────────────────┬─────────────────────────────┘
//!                              │ classify(auth, address)
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                    LimiterRegistry                       │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────┐  │
//! │  │ PolicyTable  │  │  Readiness   │  │  admit()       │  │
//! │  │ (per tier)   │  │  (watch)     │  │  fail closed   │  │
//! │  └──────────────┘  └──────────────┘  └────────────────┘  │
//! └────────────────────────────┬─────────────────────────────┘
//!                              │ increment(key, window)
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                CounterStore (Redis / memory)             │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod policy;
mod registry;
mod tier;

pub use policy::{
    PolicyTable, QuotaPolicy, DEFAULT_GUEST_ALLOWANCE, DEFAULT_MEMBER_ALLOWANCE,
    DEFAULT_PREMIUM_ALLOWANCE, DEFAULT_WINDOW_SECS,
};
pub use registry::{
    Admission, LimiterRegistry, LimiterState, Readiness, RetryPolicy, DEFAULT_KEY_PREFIX,
    DEFAULT_STORE_TIMEOUT,
};
pub use tier::{classify, AuthContext, CallerIdentity, Tier};
