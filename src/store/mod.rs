//! Counter store layer.
//!
//! The rate limiter never counts requests itself: it asks a shared store to
//! atomically increment a windowed counter and reads back the new count and
//! the time left in the window.
//!
//! - [`CounterStore`]: the increment-with-window contract
//! - [`StoreConnector`]: opens a store, possibly after the process started
//! - [`RedisCounterStore`]: production backend shared by every instance
//! - [`InMemoryCounterStore`]: single-process backend for development and tests

mod counter;
mod memory;
mod redis_store;

pub use counter::{CounterSnapshot, CounterStore, StoreConnector};
pub use memory::{InMemoryConnector, InMemoryCounterStore};
pub use redis_store::{redact_url, RedisConnector, RedisCounterStore};
