//! # Cache Client
//!
//! JSON-typed access to a [`CacheStore`] for business code.
//!
//! The cache is an optimization, not a source of truth, so nothing here
//! returns an error. A store that is unreachable, slow or returns something
//! undecodable turns every read into a miss and every write into a no-op;
//! the failure is logged and counted.
//!
//! One client wraps one shared store handle. It is built once by the process
//! entry point and handed to whoever needs it behind an `Arc`.

use super::stores::{CacheStore, KeyTtl, MessageStream};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Counters collected by the cache client
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheClientStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub hit_ratio: f64,
}

/// JSON cache client over a shared store
pub struct CacheClient {
    store: Arc<dyn CacheStore>,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl CacheClient {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Store `value` as JSON. Without a TTL the key never expires.
    ///
    /// Returns whether the value was stored.
    pub async fn set<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool
    where
        T: Serialize + ?Sized,
    {
        let serialized = match serde_json::to_string(value) {
            Ok(serialized) => serialized,
            Err(e) => {
                error!("Cache SET serialization error for {}: {}", key, e);
                self.record_error();
                return false;
            }
        };

        match self.store.set(key, &serialized, ttl).await {
            Ok(()) => true,
            Err(e) => {
                error!("Cache SET error for {}: {}", key, e);
                self.record_error();
                false
            }
        }
    }

    /// Read and decode a value. `None` when the key is absent, the stored
    /// value does not decode as `T`, or the store failed.
    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Some(value)
                }
                Err(e) => {
                    warn!("Cache value for {} could not be decoded, treating as miss: {}", key, e);
                    self.record_error();
                    None
                }
            },
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                error!("Cache GET error for {}: {}", key, e);
                self.record_error();
                None
            }
        }
    }

    /// Store several values with a shared TTL. Returns `true` only if all were stored.
    pub async fn set_many<T>(&self, entries: &[(&str, T)], ttl: Option<Duration>) -> bool
    where
        T: Serialize,
    {
        let mut all_stored = true;
        for (key, value) in entries {
            all_stored &= self.set(key, value, ttl).await;
        }
        all_stored
    }

    /// Read several keys; keys that miss are left out of the result
    pub async fn get_many<T>(&self, keys: &[&str]) -> HashMap<String, T>
    where
        T: DeserializeOwned,
    {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key).await {
                found.insert(key.to_string(), value);
            }
        }
        found
    }

    /// Delete a key, returning the number of keys removed
    pub async fn del(&self, key: &str) -> u64 {
        self.store.delete(key).await.unwrap_or_else(|e| {
            error!("Cache DEL error for {}: {}", key, e);
            self.record_error();
            0
        })
    }

    /// Delete every key matching a glob pattern, returning the number removed
    pub async fn del_pattern(&self, pattern: &str) -> u64 {
        self.store.delete_pattern(pattern).await.unwrap_or_else(|e| {
            error!("Cache DEL pattern error for {}: {}", pattern, e);
            self.record_error();
            0
        })
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.store.exists(key).await.unwrap_or_else(|e| {
            error!("Cache EXISTS error for {}: {}", key, e);
            self.record_error();
            false
        })
    }

    /// Remaining lifetime of a key; a store failure reads as [`KeyTtl::Missing`]
    pub async fn ttl(&self, key: &str) -> KeyTtl {
        self.store.ttl(key).await.unwrap_or_else(|e| {
            error!("Cache TTL error for {}: {}", key, e);
            self.record_error();
            KeyTtl::Missing
        })
    }

    /// Publish a JSON message, returning the number of receivers
    pub async fn publish<T>(&self, channel: &str, message: &T) -> u64
    where
        T: Serialize + ?Sized,
    {
        let serialized = match serde_json::to_string(message) {
            Ok(serialized) => serialized,
            Err(e) => {
                error!("Cache PUBLISH serialization error on {}: {}", channel, e);
                self.record_error();
                return 0;
            }
        };

        self.store.publish(channel, &serialized).await.unwrap_or_else(|e| {
            error!("Cache PUBLISH error on {}: {}", channel, e);
            self.record_error();
            0
        })
    }

    /// Subscribe to a channel. `None` when the store cannot subscribe.
    pub async fn subscribe<T>(&self, channel: &str) -> Option<Subscription<T>>
    where
        T: DeserializeOwned,
    {
        match self.store.subscribe(channel).await {
            Ok(messages) => Some(Subscription::new(channel, messages)),
            Err(e) => {
                error!("Cache SUBSCRIBE error on {}: {}", channel, e);
                self.record_error();
                None
            }
        }
    }

    /// Whether the store answers
    pub async fn ping(&self) -> bool {
        self.store.health_check().await.unwrap_or(false)
    }

    /// Release the store's connections
    pub async fn shutdown(&self) {
        self.store.shutdown().await;
    }

    pub fn stats(&self) -> CacheClientStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheClientStats {
            hits,
            misses,
            errors: self.errors.load(Ordering::Relaxed),
            hit_ratio: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

/// A channel subscription yielding decoded messages
///
/// Messages are pulled lazily with [`Subscription::next`]. The sequence ends
/// when [`Subscription::close`] is called or the connection behind it is
/// lost. Dropping the handle also releases the subscription.
pub struct Subscription<T> {
    channel: String,
    messages: Option<MessageStream>,
    _message: PhantomData<fn() -> T>,
}

impl<T> Subscription<T>
where
    T: DeserializeOwned,
{
    fn new(channel: &str, messages: MessageStream) -> Self {
        Self {
            channel: channel.to_string(),
            messages: Some(messages),
            _message: PhantomData,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_closed(&self) -> bool {
        self.messages.is_none()
    }

    /// Next message; undecodable messages are skipped. `None` once closed.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            let messages = self.messages.as_mut()?;

            match messages.next().await {
                Some(raw) => match serde_json::from_str(&raw) {
                    Ok(message) => return Some(message),
                    Err(e) => warn!("Skipping undecodable message on {}: {}", self.channel, e),
                },
                None => {
                    debug!("Subscription to {} ended", self.channel);
                    self.messages = None;
                    return None;
                }
            }
        }
    }

    /// Unsubscribe. Further calls to `next` return `None`.
    pub fn close(&mut self) {
        if self.messages.take().is_some() {
            debug!("Closed subscription to {}", self.channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::stores::InMemoryCache;
    use crate::caching::{CacheError, CacheResult};
    use async_trait::async_trait;
    use serde::Deserialize;

    /// Store whose every operation fails, like an unreachable Redis
    struct UnreachableStore;

    #[async_trait]
    impl CacheStore for UnreachableStore {
        async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
            Err(CacheError::Unavailable)
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> CacheResult<()> {
            Err(CacheError::Timeout)
        }
        async fn delete(&self, _key: &str) -> CacheResult<u64> {
            Err(CacheError::Unavailable)
        }
        async fn delete_pattern(&self, _pattern: &str) -> CacheResult<u64> {
            Err(CacheError::Unavailable)
        }
        async fn exists(&self, _key: &str) -> CacheResult<bool> {
            Err(CacheError::Unavailable)
        }
        async fn ttl(&self, _key: &str) -> CacheResult<KeyTtl> {
            Err(CacheError::Unavailable)
        }
        async fn publish(&self, _channel: &str, _message: &str) -> CacheResult<u64> {
            Err(CacheError::Unavailable)
        }
        async fn subscribe(&self, _channel: &str) -> CacheResult<MessageStream> {
            Err(CacheError::Unavailable)
        }
        async fn health_check(&self) -> CacheResult<bool> {
            Err(CacheError::Unavailable)
        }
        async fn shutdown(&self) {}
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Session {
        client_id: String,
        expires_in: u64,
    }

    fn memory_client() -> (Arc<InMemoryCache>, CacheClient) {
        let store = Arc::new(InMemoryCache::new());
        (store.clone(), CacheClient::new(store))
    }

    #[tokio::test]
    async fn test_unreachable_store_degrades_to_miss_and_noop() {
        let client = CacheClient::new(Arc::new(UnreachableStore));

        assert!(!client.set("k", &1, Some(Duration::from_secs(1))).await);
        assert_eq!(client.get::<u32>("k").await, None);
        assert_eq!(client.del("k").await, 0);
        assert_eq!(client.del_pattern("k*").await, 0);
        assert!(!client.exists("k").await);
        assert_eq!(client.ttl("k").await, KeyTtl::Missing);
        assert_eq!(client.publish("c", "m").await, 0);
        assert!(client.subscribe::<String>("c").await.is_none());
        assert!(!client.ping().await);
        assert_eq!(client.stats().errors, 8);
    }

    #[tokio::test]
    async fn test_json_values_and_stats() {
        let (_, client) = memory_client();
        let session = Session {
            client_id: "C-1".to_string(),
            expires_in: 3600,
        };

        assert!(client.set("247:client:data", &session, None).await);
        assert_eq!(client.get::<Session>("247:client:data").await, Some(session));
        assert_eq!(client.get::<Session>("247:auth:data").await, None);

        let stats = client.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert!((stats.hit_ratio - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_undecodable_value_reads_as_miss() {
        let (store, client) = memory_client();
        store.set("bol:x", "not json", None).await.unwrap();

        assert_eq!(client.get::<serde_json::Value>("bol:x").await, None);
        assert_eq!(client.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_set_many_get_many() {
        let (_, client) = memory_client();
        assert!(client.set_many(&[("a", 1u32), ("b", 2u32)], None).await);

        let found: HashMap<String, u32> = client.get_many(&["a", "b", "c"]).await;
        assert_eq!(found.len(), 2);
        assert_eq!(found["b"], 2);
    }

    #[tokio::test]
    async fn test_subscription_skips_bad_messages_and_closes() {
        let (store, client) = memory_client();
        let mut subscription = client.subscribe::<Session>("sessions").await.unwrap();
        assert_eq!(subscription.channel(), "sessions");

        store.publish("sessions", "garbage").await.unwrap();
        let session = Session {
            client_id: "C-2".to_string(),
            expires_in: 60,
        };
        assert_eq!(client.publish("sessions", &session).await, 1);

        assert_eq!(subscription.next().await, Some(session));

        subscription.close();
        assert!(subscription.is_closed());
        assert_eq!(subscription.next().await, None);
    }

    #[tokio::test]
    async fn test_subscription_ends_on_connection_loss() {
        let (_, client) = memory_client();
        let mut subscription = client.subscribe::<u32>("ticks").await.unwrap();

        client.shutdown().await;
        assert_eq!(subscription.next().await, None);
        assert!(subscription.is_closed());
    }
}
