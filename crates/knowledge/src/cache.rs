//! In-process caches.
//!
//! Two namespaces: content embeddings keyed by `(content_hash, model_version)`,
//! and final responses keyed by the normalized query text. Each namespace sits
//! behind its own mutex, so embedding lookups never wait on response writes.

use crate::config::CacheConfig;
use crate::types::ChatResponse;
use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Lookup counters for one cache.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Hit rate as a fraction [0.0, 1.0]. Returns 0.0 if no lookups.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    ttl: Option<Duration>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.ttl
            .map(|ttl| now.duration_since(self.created_at) >= ttl)
            .unwrap_or(false)
    }
}

/// Capacity-bounded LRU with an optional time-to-live per entry.
///
/// Expired entries are dropped when read, and evicted ahead of live entries
/// when a write finds the cache full.
#[derive(Debug)]
pub struct TtlLruCache<V> {
    entries: LruCache<String, CacheEntry<V>>,
    ttl: Option<Duration>,
    stats: CacheStats,
}

impl<V: Clone> TtlLruCache<V> {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            ttl,
            stats: CacheStats::default(),
        }
    }

    pub fn get(&mut self, key: &str) -> Option<V> {
        let now = Instant::now();
        let expired = match self.entries.peek(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                self.stats.misses += 1;
                return None;
            }
        };

        if expired {
            self.entries.pop(key);
            self.stats.expirations += 1;
            self.stats.misses += 1;
            return None;
        }

        self.stats.hits += 1;
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn put(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        if !self.entries.contains(&key) && self.entries.len() >= self.entries.cap().get() {
            self.purge_expired();
        }

        let entry = CacheEntry {
            value,
            created_at: Instant::now(),
            ttl: self.ttl,
        };

        if let Some((evicted, _)) = self.entries.push(key.clone(), entry) {
            if evicted != key {
                self.stats.evictions += 1;
            }
        }
    }

    /// Drop every expired entry. Returns how many were dropped.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.entries.pop(key);
        }
        self.stats.expirations += expired.len() as u64;
        expired.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            ..self.stats
        }
    }
}

/// Snapshot of both namespaces.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CacheLayerStats {
    pub embeddings: CacheStats,
    pub responses: CacheStats,
}

/// Embedding and response caches shared by the pipeline.
#[derive(Debug)]
pub struct CacheLayer {
    embeddings: Mutex<TtlLruCache<Vec<f32>>>,
    responses: Mutex<TtlLruCache<ChatResponse>>,
    /// Bumped by every `clear_responses`, under the responses lock
    response_epoch: AtomicU64,
}

impl CacheLayer {
    /// Embeddings never expire (content hashes are immutable); responses
    /// expire after `response_ttl`.
    pub fn new(embedding_capacity: usize, response_capacity: usize, response_ttl: Duration) -> Self {
        Self {
            embeddings: Mutex::new(TtlLruCache::new(embedding_capacity, None)),
            responses: Mutex::new(TtlLruCache::new(response_capacity, Some(response_ttl))),
            response_epoch: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.embedding_capacity,
            config.response_capacity,
            config.response_ttl(),
        )
    }

    fn embeddings(&self) -> MutexGuard<'_, TtlLruCache<Vec<f32>>> {
        self.embeddings.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn responses(&self) -> MutexGuard<'_, TtlLruCache<ChatResponse>> {
        self.responses.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get_embedding(&self, content_hash: &str, model_version: &str) -> Option<Vec<f32>> {
        self.embeddings().get(&embedding_key(content_hash, model_version))
    }

    pub fn put_embedding(&self, content_hash: &str, model_version: &str, vector: Vec<f32>) {
        self.embeddings()
            .put(embedding_key(content_hash, model_version), vector);
    }

    /// `normalized_query` must already be passed through `faq::normalize`.
    pub fn get_response(&self, normalized_query: &str) -> Option<ChatResponse> {
        self.responses().get(normalized_query)
    }

    pub fn put_response(&self, normalized_query: &str, response: ChatResponse) {
        self.responses().put(normalized_query, response);
    }

    /// Number of times the response cache has been cleared.
    pub fn response_epoch(&self) -> u64 {
        self.response_epoch.load(Ordering::SeqCst)
    }

    /// Cache `response` only if no clear happened since `epoch` was read.
    /// Returns whether the response was stored.
    pub fn put_response_since(&self, epoch: u64, normalized_query: &str, response: ChatResponse) -> bool {
        let mut responses = self.responses();
        if self.response_epoch.load(Ordering::SeqCst) != epoch {
            return false;
        }
        responses.put(normalized_query, response);
        true
    }

    /// Forget every cached answer, e.g. after the knowledge base changed.
    pub fn clear_responses(&self) {
        let mut responses = self.responses();
        responses.clear();
        self.response_epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn stats(&self) -> CacheLayerStats {
        CacheLayerStats {
            embeddings: self.embeddings().stats(),
            responses: self.responses().stats(),
        }
    }
}

fn embedding_key(content_hash: &str, model_version: &str) -> String {
    format!("{}@{}", model_version, content_hash)
}
