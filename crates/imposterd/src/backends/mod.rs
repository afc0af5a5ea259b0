//! FlowStore backend implementations.
//!
//! `inmemory` is always available. `redis` is gated behind the
//! `redis-backend` feature since it pulls in a blocking client and
//! connection pool that most deployments don't need.

mod inmemory;
pub use inmemory::InMemoryFlowStore;

#[cfg(feature = "redis-backend")]
mod redis;
#[cfg(feature = "redis-backend")]
pub use redis::RedisFlowStore;
