//! # Caching Module
//!
//! The cache-aside layer that sits in front of the spreadsheet lookup.
//!
//! ## Architecture
//! The caching system is layered:
//! 1. **Cache Stores** (`stores`): the raw key-value store behind the
//!    [`CacheStore`] trait, with Redis and in-memory implementations.
//!    Values are plain strings and every operation returns a `Result`.
//! 2. **Cache Client** (`client`): JSON serialization on top of a store and
//!    the "cache is an optimization" policy. Nothing in the client returns an
//!    error; failures are logged and read as a miss or a no-op.
//! 3. **Resolver** (`resolver`): get-or-compute with negative caching.
//!
//! ## Usage Example
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use bol_tracking::caching::{CacheAsideResolver, CacheClient, InMemoryCache};
//!
//! let client = Arc::new(CacheClient::new(Arc::new(InMemoryCache::new())));
//! let resolver = CacheAsideResolver::new(client);
//!
//! let resolution = resolver
//!     .resolve("bol:detailBySheet:ABC123456", Duration::from_secs(3600), || async {
//!         fetch_from_sheet("ABC123456").await
//!     })
//!     .await?;
//! ```

pub mod client;
pub mod resolver;
pub mod stores;

pub use client::{CacheClient, CacheClientStats, Subscription};
pub use resolver::{CacheAsideResolver, CachedEntry, Resolution};
pub use stores::{CacheStore, InMemoryCache, KeyTtl, MessageStream, RedisCache, RedisCacheConfig};

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache store error: {message}")]
    Store { message: String },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache operation timeout")]
    Timeout,

    #[error("Cache not available")]
    Unavailable,
}
