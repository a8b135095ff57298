//! Content-addressed response cache.
//!
//! Keys are deterministic hashes over (normalized query text, domain,
//! answer-relevant config fields). Entries expire lazily on read (TTL) and
//! are evicted least-recently-used once `max_size` is reached.
//!
//! The concurrency-critical guarantee: at most one in-flight computation per
//! key. A second caller for an in-flight key awaits the first computation's
//! per-key gate instead of duplicating the expensive model call; unrelated
//! keys never contend because the gate registry is keyed by hash, not a
//! global lock. A failed computation releases the key for retry rather than
//! poisoning the cache.

use crate::config::CacheSettings;
use crate::{Result, current_timestamp};
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Deterministic cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Builds a key from the normalized query text, domain, and the
    /// answer-relevant config fields (see `RunConfig::cache_key_fields`).
    #[must_use]
    pub fn for_query(normalized_query: &str, domain: &str, config_fields: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalized_query.as_bytes());
        hasher.update([0u8]);
        hasher.update(domain.as_bytes());
        hasher.update([0u8]);
        hasher.update(config_fields.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// The key as a hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The cached payload produced by a computation.
#[derive(Debug, Clone)]
pub struct CachedAnswer {
    /// The final answer text.
    pub answer: String,
    /// Aggregate quality score of the run that produced it.
    pub quality_score: f64,
    /// Whether the verification loop converged when it was produced.
    pub converged: bool,
    /// What the original computation cost in USD.
    pub cost_usd: f64,
}

/// A cache entry as returned to callers.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached payload.
    pub value: CachedAnswer,
    /// Unix timestamp when the entry was stored.
    pub created_at: u64,
    /// Number of times this entry has been served.
    pub hit_count: u64,
}

#[derive(Debug)]
struct StoredEntry {
    value: CachedAnswer,
    tags: Vec<String>,
    created_at: u64,
    stored_at: Instant,
    hit_count: u64,
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    /// Current number of live entries.
    pub size: usize,
    /// Hits divided by total lookups, 0.0 when never queried.
    pub hit_rate: f64,
    /// Total lookups that were served from cache.
    pub hits: u64,
    /// Total lookups that required computation.
    pub misses: u64,
    /// Entries evicted by the LRU policy (TTL expiries not included).
    pub eviction_count: u64,
}

/// LRU + TTL response cache with per-key singleflight.
pub struct ResponseCache {
    entries: Mutex<LruCache<CacheKey, StoredEntry>>,
    inflight: Mutex<HashMap<CacheKey, std::sync::Arc<tokio::sync::Mutex<()>>>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    /// Creates a cache from settings.
    #[must_use]
    pub fn new(settings: &CacheSettings) -> Self {
        let capacity = NonZeroUsize::new(settings.max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            inflight: Mutex::new(HashMap::new()),
            ttl: Duration::from_secs(settings.ttl_secs),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns the cached entry for `key`, or runs `compute` to produce one.
    ///
    /// The boolean in the result is `true` for a cache hit. Entries past
    /// their TTL are treated as misses and recomputed. Concurrent callers
    /// for the same key await the first computation and then read its
    /// result; a failed computation releases the key so the next caller
    /// retries.
    ///
    /// # Errors
    ///
    /// Propagates the `compute` failure to this caller only; the key itself
    /// is left uncached.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &CacheKey,
        tags: &[String],
        compute: F,
    ) -> Result<(CacheEntry, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedAnswer>>,
    {
        if let Some(entry) = self.lookup(key) {
            return Ok((entry, true));
        }

        let gate = self.inflight_gate(key);
        let guard = gate.lock().await;

        // The first caller may have populated the entry while we waited.
        if let Some(entry) = self.lookup(key) {
            drop(guard);
            self.release_gate(key, &gate);
            return Ok((entry, true));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("cache_misses_total").increment(1);

        // The entry must be published before the gate is released: a waiter
        // that wakes on the gate re-checks the cache, and must find the value
        // there rather than recompute.
        let outcome = match compute().await {
            Ok(value) => {
                let entry = self.insert(key.clone(), value, tags);
                Ok((entry, false))
            },
            Err(e) => {
                metrics::counter!("cache_compute_failures_total").increment(1);
                tracing::warn!(key = %key, error = %e, "cached computation failed; key released");
                Err(e)
            },
        };
        drop(guard);
        self.release_gate(key, &gate);
        outcome
    }

    /// Removes a single entry.
    pub fn invalidate(&self, key: &CacheKey) {
        self.lock_entries().pop(key);
    }

    /// Removes every entry carrying `tag`.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_by_tag(&self, tag: &str) -> usize {
        let mut entries = self.lock_entries();
        let doomed: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| entry.tags.iter().any(|t| t == tag))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    /// Removes all expired entries. Lazy per-read expiry already treats them
    /// as misses; sweeping just reclaims the memory sooner.
    ///
    /// Returns the number of entries removed.
    pub fn sweep_expired(&self) -> usize {
        let mut entries = self.lock_entries();
        let doomed: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| entry.stored_at.elapsed() >= self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let size = self.lock_entries().len();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        CacheStats {
            size,
            hit_rate,
            hits,
            misses,
            eviction_count: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, LruCache<CacheKey, StoredEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Looks up a live entry, applying lazy TTL expiry and bumping recency
    /// and hit count.
    fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut entries = self.lock_entries();
        let expired = entries
            .get(key)
            .is_some_and(|entry| entry.stored_at.elapsed() >= self.ttl);
        if expired {
            entries.pop(key);
            return None;
        }
        let entry = entries.get_mut(key)?;
        entry.hit_count += 1;
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("cache_hits_total").increment(1);
        Some(CacheEntry {
            value: entry.value.clone(),
            created_at: entry.created_at,
            hit_count: entry.hit_count,
        })
    }

    fn insert(&self, key: CacheKey, value: CachedAnswer, tags: &[String]) -> CacheEntry {
        let entry = CacheEntry {
            value: value.clone(),
            created_at: current_timestamp(),
            hit_count: 0,
        };
        let mut entries = self.lock_entries();
        if entries.len() == usize::from(entries.cap()) && !entries.contains(&key) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("cache_evictions_total").increment(1);
        }
        entries.put(
            key,
            StoredEntry {
                value,
                tags: tags.to_vec(),
                created_at: entry.created_at,
                stored_at: Instant::now(),
                hit_count: 0,
            },
        );
        entry
    }

    /// Fetches or creates the per-key singleflight gate.
    fn inflight_gate(&self, key: &CacheKey) -> std::sync::Arc<tokio::sync::Mutex<()>> {
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inflight
            .entry(key.clone())
            .or_insert_with(|| std::sync::Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drops the gate from the registry once no other caller holds it.
    ///
    /// Gate clones are only handed out under the registry lock, so checking
    /// the strong count under that same lock is race-free: 2 means the
    /// registry and us.
    fn release_gate(&self, key: &CacheKey, gate: &std::sync::Arc<tokio::sync::Mutex<()>>) {
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if std::sync::Arc::strong_count(gate) == 2 {
            inflight.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    fn settings(max_size: usize, ttl_secs: u64) -> CacheSettings {
        CacheSettings { max_size, ttl_secs }
    }

    fn answer(text: &str) -> CachedAnswer {
        CachedAnswer {
            answer: text.to_string(),
            quality_score: 0.9,
            converged: true,
            cost_usd: 0.01,
        }
    }

    #[test]
    fn test_key_is_deterministic_and_config_sensitive() {
        let a = CacheKey::for_query("what is 2+2?", "math", "top_k=5");
        let b = CacheKey::for_query("what is 2+2?", "math", "top_k=5");
        let c = CacheKey::for_query("what is 2+2?", "math", "top_k=9");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache = ResponseCache::new(&settings(8, 3600));
        let key = CacheKey::for_query("q", "d", "");
        let (first, hit) = cache
            .get_or_compute(&key, &[], || async { Ok(answer("four")) })
            .await
            .unwrap();
        assert!(!hit);
        assert_eq!(first.hit_count, 0);

        let (second, hit) = cache
            .get_or_compute(&key, &[], || async {
                Err::<CachedAnswer, _>(Error::InvalidInput("must not recompute".into()))
            })
            .await
            .unwrap();
        assert!(hit);
        assert_eq!(second.value.answer, "four");
        assert_eq!(second.hit_count, 1);
    }

    #[tokio::test]
    async fn test_singleflight_dedupes_concurrent_computations() {
        let cache = Arc::new(ResponseCache::new(&settings(8, 3600)));
        let key = CacheKey::for_query("slow", "d", "");
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(&key, &[], || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(answer("done"))
                    })
                    .await
            }));
        }
        for handle in handles {
            let (entry, _) = handle.await.unwrap().unwrap();
            assert_eq!(entry.value.answer, "done");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_singleflight_holds_across_threads() {
        // The computed value must already be visible when the gate opens, so
        // a waiter that wakes on a real parallel runtime still sees a hit.
        let cache = Arc::new(ResponseCache::new(&settings(64, 3600)));
        for round in 0..20 {
            let key = CacheKey::for_query(&format!("q{round}"), "d", "");
            let calls = Arc::new(AtomicU32::new(0));
            let mut handles = Vec::new();
            for _ in 0..8 {
                let cache = Arc::clone(&cache);
                let key = key.clone();
                let calls = Arc::clone(&calls);
                handles.push(tokio::spawn(async move {
                    cache
                        .get_or_compute(&key, &[], || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            Ok(answer("done"))
                        })
                        .await
                }));
            }
            for handle in handles {
                handle.await.unwrap().unwrap();
            }
            assert_eq!(calls.load(Ordering::SeqCst), 1, "round {round} recomputed");
        }
    }

    #[tokio::test]
    async fn test_different_keys_do_not_contend() {
        let cache = Arc::new(ResponseCache::new(&settings(8, 3600)));
        let started = std::time::Instant::now();
        let slow = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                let key = CacheKey::for_query("slow", "d", "");
                cache
                    .get_or_compute(&key, &[], || async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok(answer("slow"))
                    })
                    .await
            })
        };
        // While the slow key computes, a fast key must complete immediately.
        let key = CacheKey::for_query("fast", "d", "");
        cache
            .get_or_compute(&key, &[], || async { Ok(answer("fast")) })
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(150));
        slow.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_failed_compute_releases_key_for_retry() {
        let cache = ResponseCache::new(&settings(8, 3600));
        let key = CacheKey::for_query("flaky", "d", "");

        let err = cache
            .get_or_compute(&key, &[], || async {
                Err::<CachedAnswer, _>(Error::TierFailed {
                    tier: crate::models::Tier::Student,
                    cause: "boom".into(),
                })
            })
            .await;
        assert!(err.is_err());

        // The failure was not cached; the next caller computes successfully.
        let (entry, hit) = cache
            .get_or_compute(&key, &[], || async { Ok(answer("recovered")) })
            .await
            .unwrap();
        assert!(!hit);
        assert_eq!(entry.value.answer, "recovered");
    }

    #[tokio::test]
    async fn test_ttl_expiry_is_a_miss() {
        let cache = ResponseCache::new(&settings(8, 0));
        let key = CacheKey::for_query("q", "d", "");
        cache
            .get_or_compute(&key, &[], || async { Ok(answer("v1")) })
            .await
            .unwrap();
        // ttl_secs = 0 expires immediately; the next read recomputes.
        let (entry, hit) = cache
            .get_or_compute(&key, &[], || async { Ok(answer("v2")) })
            .await
            .unwrap();
        assert!(!hit);
        assert_eq!(entry.value.answer, "v2");
    }

    #[tokio::test]
    async fn test_lru_eviction_once_full() {
        let cache = ResponseCache::new(&settings(2, 3600));
        for name in ["a", "b", "c"] {
            let key = CacheKey::for_query(name, "d", "");
            cache
                .get_or_compute(&key, &[], || async { Ok(answer(name)) })
                .await
                .unwrap();
        }
        let stats = cache.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.eviction_count, 1);

        // "a" was least recently used and must now be a miss.
        let key_a = CacheKey::for_query("a", "d", "");
        let (_, hit) = cache
            .get_or_compute(&key_a, &[], || async { Ok(answer("a2")) })
            .await
            .unwrap();
        assert!(!hit);
    }

    #[tokio::test]
    async fn test_invalidate_by_tag() {
        let cache = ResponseCache::new(&settings(8, 3600));
        for (name, domain) in [("a", "math"), ("b", "math"), ("c", "history")] {
            let key = CacheKey::for_query(name, domain, "");
            cache
                .get_or_compute(&key, &[domain.to_string()], || async { Ok(answer(name)) })
                .await
                .unwrap();
        }
        assert_eq!(cache.invalidate_by_tag("math"), 2);
        assert_eq!(cache.stats().size, 1);
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let cache = ResponseCache::new(&settings(8, 0));
        let key = CacheKey::for_query("q", "d", "");
        cache
            .get_or_compute(&key, &[], || async { Ok(answer("v")) })
            .await
            .unwrap();
        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.stats().size, 0);
    }

    #[tokio::test]
    async fn test_stats_hit_rate() {
        let cache = ResponseCache::new(&settings(8, 3600));
        let key = CacheKey::for_query("q", "d", "");
        cache
            .get_or_compute(&key, &[], || async { Ok(answer("v")) })
            .await
            .unwrap();
        cache
            .get_or_compute(&key, &[], || async { Ok(answer("v")) })
            .await
            .unwrap();
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }
}
