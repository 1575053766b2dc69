//! # Cache-Aside Resolver
//!
//! Get-or-compute over a [`CacheClient`] with negative caching. A lookup
//! that found nothing is remembered as the JSON empty object `{}` for the
//! same TTL as a positive result, so repeated misses do not reach the
//! source until the sentinel expires.
//!
//! There is no lock around read-then-write: two concurrent misses on the
//! same key may both compute, and the last write wins.

use super::client::CacheClient;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What the cache holds for a key
#[derive(Debug, Clone, PartialEq)]
pub enum CachedEntry<T> {
    /// Nothing usable is stored
    Absent,
    /// A previous lookup found nothing
    NotFound,
    Found(T),
}

/// How a key was resolved
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    /// Served from the cache
    Hit(T),
    /// The cache remembers that nothing exists
    NegativeHit,
    /// Computed and written to the cache
    Fetched(T),
    /// Computed, found nothing, sentinel written
    FetchedNone,
}

impl<T> Resolution<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Hit(value) | Self::Fetched(value) => Some(value),
            Self::NegativeHit | Self::FetchedNone => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Hit(_) | Self::Fetched(_))
    }

    /// Whether the answer came from the cache without computing
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Hit(_) | Self::NegativeHit)
    }
}

fn is_negative_sentinel(value: &Value) -> bool {
    value.as_object().map_or(false, |object| object.is_empty())
}

/// Cache-aside resolver with negative caching
///
/// Values whose JSON form is itself `{}` cannot be cached positively; they
/// read back as [`CachedEntry::NotFound`].
#[derive(Clone)]
pub struct CacheAsideResolver {
    client: Arc<CacheClient>,
}

impl CacheAsideResolver {
    pub fn new(client: Arc<CacheClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<CacheClient> {
        &self.client
    }

    /// Read the cached state of a key
    pub async fn read_entry<T>(&self, key: &str) -> CachedEntry<T>
    where
        T: DeserializeOwned,
    {
        let Some(raw) = self.client.get::<Value>(key).await else {
            return CachedEntry::Absent;
        };

        if is_negative_sentinel(&raw) {
            return CachedEntry::NotFound;
        }

        match serde_json::from_value(raw) {
            Ok(value) => CachedEntry::Found(value),
            Err(e) => {
                warn!("Cached entry {} has an unexpected shape, ignoring it: {}", key, e);
                CachedEntry::Absent
            }
        }
    }

    /// Resolve `key` from the cache, or compute it and cache the outcome
    /// (positive or negative) for `ttl`.
    ///
    /// Errors from `compute` are returned unchanged and nothing is cached.
    /// A failed cache write does not fail the resolution.
    pub async fn resolve<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<Resolution<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        match self.read_entry(key).await {
            CachedEntry::Found(value) => {
                debug!("Cache hit for {}", key);
                return Ok(Resolution::Hit(value));
            }
            CachedEntry::NotFound => {
                debug!("Negative cache hit for {}", key);
                return Ok(Resolution::NegativeHit);
            }
            CachedEntry::Absent => {}
        }

        match compute().await? {
            Some(value) => {
                if !self.client.set(key, &value, Some(ttl)).await {
                    warn!("Could not cache resolved value for {}", key);
                }
                Ok(Resolution::Fetched(value))
            }
            None => {
                if !self.client.set(key, &Value::Object(Default::default()), Some(ttl)).await {
                    warn!("Could not cache not-found marker for {}", key);
                }
                Ok(Resolution::FetchedNone)
            }
        }
    }
}
