//! # In-Memory Cache Store
//!
//! A [`CacheStore`] kept in process memory. It mirrors the Redis semantics
//! the rest of the crate relies on: per-key TTL, `TTL` replies, glob pattern
//! deletes and fire-and-forget pub/sub.
//!
//! Expired entries are dropped when read and by a sweep that runs every
//! [`SWEEP_EVERY`] writes. Channels with no subscribers left are pruned on
//! publish.
//!
//! Expiry is measured on the tokio clock, so tests running with a paused
//! runtime (`#[tokio::test(start_paused = true)]`) can move past a TTL with
//! `tokio::time::advance` instead of sleeping.

use super::{CacheStore, KeyTtl, MessageStream};
use crate::caching::{CacheError, CacheResult};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use regex::Regex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

/// Buffered messages per channel before slow subscribers start lagging
const CHANNEL_CAPACITY: usize = 256;

/// Writes between two expiry sweeps
pub const SWEEP_EVERY: u64 = 128;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }
}

/// In-memory cache implementation
pub struct InMemoryCache {
    entries: DashMap<String, MemoryEntry>,
    channels: DashMap<String, broadcast::Sender<String>>,
    writes: AtomicU64,
    closed: AtomicBool,
}

impl InMemoryCache {
    /// Create a new, empty in-memory cache
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            channels: DashMap::new(),
            writes: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of live (unexpired) entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.value().is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of channels that still have a sender
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("Purged {} expired in-memory keys", removed);
        }
        removed
    }

    fn ensure_open(&self) -> CacheResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Unavailable);
        }
        Ok(())
    }

    /// Read a live entry, dropping it if it has expired
    fn live_entry(&self, key: &str) -> Option<MemoryEntry> {
        let now = Instant::now();
        let entry = self
            .entries
            .get(key)
            .and_then(|e| (!e.is_expired(now)).then(|| e.value().clone()));

        if entry.is_none() {
            self.entries.remove_if(key, |_, e| e.is_expired(now));
        }
        entry
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Translate a Redis glob pattern into an anchored regex
fn glob_to_regex(pattern: &str) -> CacheResult<Regex> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');

    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    re.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == ']' {
                        closed = true;
                        break;
                    }
                    class.push(n);
                }
                if !closed {
                    return Err(CacheError::Store {
                        message: format!("unterminated character class in pattern '{}'", pattern),
                    });
                }

                re.push('[');
                let body = match class.strip_prefix('^') {
                    Some(rest) => {
                        re.push('^');
                        rest
                    }
                    None => class.as_str(),
                };
                for n in body.chars() {
                    if matches!(n, '\\' | '[' | ']' | '^' | '&' | '~') {
                        re.push('\\');
                    }
                    re.push(n);
                }
                re.push(']');
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }

    re.push('$');
    Regex::new(&re).map_err(|e| CacheError::Store {
        message: format!("invalid pattern '{}': {}", pattern, e),
    })
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.ensure_open()?;
        Ok(self.live_entry(key).map(|e| e.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        self.ensure_open()?;
        let entry = MemoryEntry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.insert(key.to_string(), entry);
        debug!("Set in-memory cache key: {} with TTL: {:?}", key, ttl);

        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
            self.purge_expired();
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<u64> {
        self.ensure_open()?;
        let now = Instant::now();
        Ok(match self.entries.remove(key) {
            Some((_, entry)) if !entry.is_expired(now) => 1,
            _ => 0,
        })
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        self.ensure_open()?;
        let matcher = glob_to_regex(pattern)?;
        let now = Instant::now();

        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| matcher.is_match(e.key()))
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(&key) {
                if !entry.is_expired(now) {
                    removed += 1;
                }
            }
        }

        debug!("Deleted {} in-memory keys matching {}", removed, pattern);
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.ensure_open()?;
        Ok(self.live_entry(key).is_some())
    }

    async fn ttl(&self, key: &str) -> CacheResult<KeyTtl> {
        self.ensure_open()?;
        Ok(match self.live_entry(key) {
            None => KeyTtl::Missing,
            Some(MemoryEntry { expires_at: None, .. }) => KeyTtl::Persistent,
            Some(MemoryEntry {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(at.saturating_duration_since(Instant::now())),
        })
    }

    async fn publish(&self, channel: &str, message: &str) -> CacheResult<u64> {
        self.ensure_open()?;
        let receivers = match self.channels.get(channel) {
            // send fails only when nobody is listening
            Some(sender) => sender.send(message.to_string()).unwrap_or(0),
            None => return Ok(0),
        };

        if receivers == 0 {
            self.channels
                .remove_if(channel, |_, sender| sender.receiver_count() == 0);
        }
        Ok(receivers as u64)
    }

    async fn subscribe(&self, channel: &str) -> CacheResult<MessageStream> {
        self.ensure_open()?;
        let receiver = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        let stream = BroadcastStream::new(receiver).filter_map(|msg| async move { msg.ok() });
        Ok(stream.boxed())
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(!self.closed.load(Ordering::Acquire))
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.entries.clear();
        // dropping the senders ends every open subscription stream
        self.channels.clear();
    }
}
