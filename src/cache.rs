//! In-memory TTL cache for expensive engine results.
//!
//! Ensemble predictions and season odds are cached here. Keys carry the
//! rating-store version, so an entry computed before a game was processed is
//! never returned afterwards even if its TTL has not expired yet.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Thread-safe, cloneable cache with a fixed time-to-live per entry.
#[derive(Clone)]
pub struct TtlCache<K, V> {
    inner: Arc<RwLock<CacheInner<K, V>>>,
    ttl: Duration,
}

struct CacheInner<K, V> {
    entries: HashMap<K, (V, Instant)>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        TtlCache {
            inner: Arc::new(RwLock::new(CacheInner {
                entries: HashMap::new(),
            })),
            ttl,
        }
    }

    /// Return a fresh entry, or `None` if absent or expired.
    pub async fn get(&self, key: &K) -> Option<V> {
        if self.ttl.is_zero() {
            return None;
        }
        let inner = self.inner.read().await;
        let (value, stored_at) = inner.entries.get(key)?;
        if stored_at.elapsed() > self.ttl {
            return None;
        }
        debug!("Cache hit for {:?} (age {:?})", key, stored_at.elapsed());
        Some(value.clone())
    }

    /// Store a value, pruning expired entries so stale keys do not accumulate.
    pub async fn insert(&self, key: K, value: V) {
        if self.ttl.is_zero() {
            return;
        }
        let mut inner = self.inner.write().await;
        let ttl = self.ttl;
        inner.entries.retain(|_, (_, at)| at.elapsed() <= ttl);
        inner.entries.insert(key, (value, Instant::now()));
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        self.inner.write().await.entries.clear();
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_inserted_value() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("TOR".to_string(), 7).await;
        assert_eq!(cache.get(&"TOR".to_string()).await, Some(7));
        assert_eq!(cache.get(&"MTL".to_string()).await, None);
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let cache: TtlCache<&'static str, u32> = TtlCache::new(Duration::from_millis(10));
        cache.insert("BOS", 1).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get(&"BOS").await, None);
    }

    #[tokio::test]
    async fn zero_ttl_disables_caching() {
        let cache: TtlCache<u8, u8> = TtlCache::new(Duration::ZERO);
        cache.insert(1, 1).await;
        assert_eq!(cache.len().await, 0);
        assert_eq!(cache.get(&1).await, None);
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let cache: TtlCache<u8, u8> = TtlCache::new(Duration::from_secs(60));
        cache.insert(1, 1).await;
        cache.insert(2, 2).await;
        cache.clear().await;
        assert_eq!(cache.len().await, 0);
    }
}
