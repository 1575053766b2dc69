//! # Cache Stores Module
//!
//! Key-value store implementations: Redis for deployments and an in-memory
//! store for tests and local runs.

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryCache;
pub use redis_store::{RedisCache, RedisCacheConfig};

use super::CacheResult;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

/// Messages received on a subscribed channel, as raw strings
pub type MessageStream = BoxStream<'static, String>;

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist
    Missing,
    /// The key exists and never expires
    Persistent,
    /// The key expires after the given duration
    Expires(Duration),
}

impl KeyTtl {
    /// Decode the integer reply of the Redis `TTL` command
    pub fn from_redis_seconds(seconds: i64) -> Self {
        match seconds {
            -2 => Self::Missing,
            -1 => Self::Persistent,
            s if s >= 0 => Self::Expires(Duration::from_secs(s as u64)),
            _ => Self::Missing,
        }
    }

    /// Encode as the integer reply of the Redis `TTL` command (`-2`, `-1`, seconds)
    pub fn as_redis_seconds(&self) -> i64 {
        match self {
            Self::Missing => -2,
            Self::Persistent => -1,
            Self::Expires(d) => d.as_secs() as i64,
        }
    }
}

/// Trait for key-value store implementations
///
/// Values are opaque strings; serialization is the caller's business.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a value
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Set a value, with an expiration when `ttl` is given
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    /// Delete a key, returning the number of keys removed
    async fn delete(&self, key: &str) -> CacheResult<u64>;

    /// Delete every key matching a glob-style pattern (`*`, `?`, `[...]`)
    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Remaining lifetime of a key
    async fn ttl(&self, key: &str) -> CacheResult<KeyTtl>;

    /// Publish a message, returning the number of receivers
    async fn publish(&self, channel: &str, message: &str) -> CacheResult<u64>;

    /// Subscribe to a channel. The stream ends when the connection is lost
    /// and the subscription is released when the stream is dropped.
    async fn subscribe(&self, channel: &str) -> CacheResult<MessageStream>;

    /// Perform health check
    async fn health_check(&self) -> CacheResult<bool>;

    /// Release connections. Operations after shutdown fail with `Unavailable`.
    async fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ttl_redis_encoding() {
        assert_eq!(KeyTtl::from_redis_seconds(-2), KeyTtl::Missing);
        assert_eq!(KeyTtl::from_redis_seconds(-1), KeyTtl::Persistent);
        assert_eq!(
            KeyTtl::from_redis_seconds(42),
            KeyTtl::Expires(Duration::from_secs(42))
        );
        assert_eq!(KeyTtl::Missing.as_redis_seconds(), -2);
        assert_eq!(KeyTtl::Persistent.as_redis_seconds(), -1);
    }
}
