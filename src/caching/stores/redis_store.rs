//! # Redis Cache Store
//!
//! Redis-backed [`CacheStore`] over a single shared `ConnectionManager`.
//!
//! ## Connection lifecycle
//! - [`RedisCache::connect`] tries to establish the connection with a capped
//!   exponential backoff: the delay starts at `base_retry_delay`, doubles per
//!   attempt and never exceeds `max_retry_delay`; after
//!   `max_connect_attempts` failures the store gives up.
//! - A store that gave up stays disconnected and every operation returns
//!   [`CacheError::Unavailable`]. Callers going through the cache client read
//!   that as a miss.
//! - Once connected, the `ConnectionManager` re-establishes broken
//!   connections on its own.
//! - [`CacheStore::shutdown`] drops the shared connection.
//!
//! Every command is bounded by `operation_timeout`.

use super::{CacheStore, KeyTtl, MessageStream};
use crate::caching::{CacheError, CacheResult};
use async_trait::async_trait;
use futures::StreamExt;
use redis::{aio::ConnectionManager, Client, RedisResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Redis cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisCacheConfig {
    /// Redis connection URL
    pub url: String,

    /// Timeout for a single connection attempt
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,

    /// Timeout for a single command
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,

    /// Connection attempts before giving up
    pub max_connect_attempts: u32,

    /// Delay after the first failed attempt; doubles per attempt
    #[serde(with = "humantime_serde")]
    pub base_retry_delay: Duration,

    /// Ceiling for the backoff delay
    #[serde(with = "humantime_serde")]
    pub max_retry_delay: Duration,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connection_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(2),
            max_connect_attempts: 10,
            base_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(3),
        }
    }
}

impl RedisCacheConfig {
    /// Backoff delay after the failed attempt number `attempt` (0-based)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_retry_delay
            .saturating_mul(factor)
            .min(self.max_retry_delay)
    }
}

/// Redis cache implementation
pub struct RedisCache {
    /// Configuration
    config: RedisCacheConfig,

    /// Client used for the shared connection and for pub/sub connections
    client: Client,

    /// Shared connection; `None` when connecting gave up or after shutdown
    connection: RwLock<Option<ConnectionManager>>,

    /// Statistics counters
    connection_errors: AtomicU64,
    timeouts: AtomicU64,
}

impl RedisCache {
    /// Connect to Redis, retrying with backoff.
    ///
    /// Only an unparsable URL is an error. When every attempt fails the store
    /// is returned disconnected.
    pub async fn connect(config: RedisCacheConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.as_str())?;
        let connection = Self::connect_with_backoff(&client, &config).await;

        Ok(Self {
            config,
            client,
            connection: RwLock::new(connection),
            connection_errors: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        })
    }

    async fn connect_with_backoff(
        client: &Client,
        config: &RedisCacheConfig,
    ) -> Option<ConnectionManager> {
        for attempt in 0..config.max_connect_attempts {
            match timeout(config.connection_timeout, ConnectionManager::new(client.clone())).await {
                Ok(Ok(manager)) => {
                    info!("Redis cache connected to {}", config.url);
                    return Some(manager);
                }
                Ok(Err(e)) => {
                    warn!("Redis connection attempt {} failed: {}", attempt + 1, e);
                }
                Err(_) => {
                    warn!(
                        "Redis connection attempt {} timed out after {:?}",
                        attempt + 1,
                        config.connection_timeout
                    );
                }
            }

            if attempt + 1 < config.max_connect_attempts {
                sleep(config.retry_delay(attempt)).await;
            }
        }

        error!(
            "Redis: too many connection attempts ({}), giving up; cache operations will fail",
            config.max_connect_attempts
        );
        None
    }

    /// Whether the shared connection is available
    pub async fn is_connected(&self) -> bool {
        self.connection.read().await.is_some()
    }

    /// Number of failed commands since start
    pub fn connection_errors(&self) -> u64 {
        self.connection_errors.load(Ordering::Relaxed)
    }

    /// Number of timed out commands since start
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    async fn connection(&self) -> CacheResult<ConnectionManager> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or(CacheError::Unavailable)
    }

    /// Run a command on a clone of the shared connection, bounded by the operation timeout
    async fn execute<T, F, Fut>(&self, operation: F) -> CacheResult<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.connection().await?;

        match timeout(self.config.operation_timeout, operation(conn)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                error!("Redis operation failed: {}", e);
                self.connection_errors.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::Redis(e))
            }
            Err(_) => {
                warn!("Redis operation timed out after {:?}", self.config.operation_timeout);
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::Timeout)
            }
        }
    }

    /// Collect every key matching `pattern` with SCAN
    async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.execute(|mut conn| async move {
            let mut cursor: u64 = 0;
            let mut all_keys = Vec::new();

            loop {
                let (new_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(1000)
                    .query_async(&mut conn)
                    .await?;

                all_keys.extend(keys);

                if new_cursor == 0 {
                    break;
                }
                cursor = new_cursor;
            }

            Ok(all_keys)
        })
        .await
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let value: Option<String> = self
            .execute(|mut conn| async move {
                redis::cmd("GET").arg(key).query_async(&mut conn).await
            })
            .await?;

        debug!(
            "Redis cache {} for key: {}",
            if value.is_some() { "hit" } else { "miss" },
            key
        );
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        self.execute(|mut conn| async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(ttl) = ttl {
                // PX keeps sub-second TTLs valid; Redis rejects an expiry of 0
                cmd.arg("PX").arg((ttl.as_millis() as u64).max(1));
            }
            cmd.query_async::<_, ()>(&mut conn).await
        })
        .await?;

        debug!("Set Redis cache key: {} with TTL: {:?}", key, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<u64> {
        self.execute(|mut conn| async move {
            redis::cmd("DEL").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let keys = self.scan_keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        let deleted: u64 = self
            .execute(|mut conn| async move {
                redis::cmd("DEL").arg(&keys).query_async(&mut conn).await
            })
            .await?;

        info!("Deleted {} Redis keys matching {}", deleted, pattern);
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.execute(|mut conn| async move {
            redis::cmd("EXISTS").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn ttl(&self, key: &str) -> CacheResult<KeyTtl> {
        let seconds: i64 = self
            .execute(|mut conn| async move {
                redis::cmd("TTL").arg(key).query_async(&mut conn).await
            })
            .await?;
        Ok(KeyTtl::from_redis_seconds(seconds))
    }

    async fn publish(&self, channel: &str, message: &str) -> CacheResult<u64> {
        self.execute(|mut conn| async move {
            redis::cmd("PUBLISH")
                .arg(channel)
                .arg(message)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn subscribe(&self, channel: &str) -> CacheResult<MessageStream> {
        if !self.is_connected().await {
            return Err(CacheError::Unavailable);
        }

        // a subscribed connection cannot run other commands, so each
        // subscription gets its own
        let conn = timeout(self.config.connection_timeout, self.client.get_async_connection())
            .await
            .map_err(|_| CacheError::Timeout)??;

        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(channel).await?;
        info!("Subscribed to Redis channel {}", channel);

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move { msg.get_payload::<String>().ok() });
        Ok(stream.boxed())
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let result: CacheResult<String> = self
            .execute(|mut conn| async move { redis::cmd("PING").query_async(&mut conn).await })
            .await;

        match result {
            Ok(response) => Ok(response == "PONG"),
            Err(_) => Ok(false),
        }
    }

    async fn shutdown(&self) {
        if self.connection.write().await.take().is_some() {
            info!("Redis connection closed");
        }
    }
}
