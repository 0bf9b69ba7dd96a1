//! Durable job record store.
//!
//! This crate provides:
//! - The `JobStore` trait the worker pool depends on
//! - A Redis-backed implementation with atomic whole-record writes
//! - A retry helper for transient store errors

pub mod error;
pub mod redis_store;
pub mod retry;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use redis_store::RedisJobStore;
pub use retry::{with_retry, RetryConfig};
pub use store::JobStore;
