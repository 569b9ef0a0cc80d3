//! Time-bounded caches in front of snapshot lookups.
//!
//! Entries expire a fixed TTL after they were stored and are recomputed lazily.
//! The lock is never held while the backing lookup runs, so concurrent misses on
//! the same key may each compute a value; the last one stored wins. Failed
//! lookups are not cached.

use crate::models::snapshot::{SnapshotCacheResult, SnapshotProject, SnapshotSummary};
use std::{
    collections::HashMap,
    future::Future,
    hash::Hash,
    sync::{PoisonError, RwLock},
    time::{Duration, Instant},
};
use uuid::Uuid;

/// Default lifetime of a cached snapshot entry.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fresh cached value, if any.
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key,
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Return the cached value or compute, store and return a new one.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = compute().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.values().filter(|entry| entry.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The three snapshot caches used by the resolver, all keyed by snapshot id.
pub struct MetadataCache {
    pub projects: TtlCache<Uuid, SnapshotProject>,
    pub snapshots: TtlCache<Uuid, SnapshotCacheResult>,
    pub summaries: TtlCache<Uuid, SnapshotSummary>,
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            projects: TtlCache::new(ttl),
            snapshots: TtlCache::new(ttl),
            summaries: TtlCache::new(ttl),
        }
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    #[tokio::test]
    async fn computes_once_per_ttl_window() {
        let cache: TtlCache<u32, String> = TtlCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let value = cache
                .get_or_try_insert_with(1, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>("one".to_string())
                })
                .await
                .unwrap();
            assert_eq!(value, "one");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_recomputed() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_millis(20));
        cache.insert(1, 10);
        assert_eq!(cache.get(&1), Some(10));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get(&1), None);
        assert!(cache.is_empty());
        let value = cache
            .get_or_try_insert_with(1, || async { Ok::<_, ()>(11) })
            .await
            .unwrap();
        assert_eq!(value, 11);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_secs(60));
        let err = cache
            .get_or_try_insert_with(1, || async { Err::<u32, _>("down") })
            .await
            .unwrap_err();
        assert_eq!(err, "down");
        assert!(cache.get(&1).is_none());
        let value = cache
            .get_or_try_insert_with(1, || async { Ok::<_, &str>(5) })
            .await
            .unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn concurrent_misses_may_both_compute() {
        let cache = Arc::new(TtlCache::<u32, u32>::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let mut tasks = Vec::new();
        for n in 0..2u32 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            let barrier = Arc::clone(&barrier);
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_try_insert_with(7, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        // both callers are inside the backing lookup at once
                        barrier.wait().await;
                        Ok::<_, ()>(n)
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.get(&7).is_some());
    }
}
