//! Expiring Cache
//!
//! Shared `{key -> (value, expires_at)}` store behind an async read/write
//! lock. Entries are replaced wholesale, never field-mutated, so readers can
//! only ever observe a complete entry. Used for cached role credentials and
//! cached isolation reports.

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Concurrency-safe cache with per-entry expiry
#[derive(Debug, Default)]
pub struct ExpiringCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached value unless it expires within `safety_buffer`.
    ///
    /// An entry with `now + safety_buffer >= expires_at` counts as a miss, so
    /// callers never receive a value that could expire mid-operation.
    pub async fn get_fresh(&self, key: &K, safety_buffer: Duration) -> Option<V> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if Utc::now() + safety_buffer >= entry.expires_at {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Expiry timestamp of the entry, fresh or not
    pub async fn expires_at(&self, key: &K) -> Option<DateTime<Utc>> {
        let entries = self.entries.read().await;
        entries.get(key).map(|e| e.expires_at)
    }

    /// Insert or replace an entry wholesale
    pub async fn insert(&self, key: K, value: V, expires_at: DateTime<Utc>) {
        let mut entries = self.entries.write().await;
        entries.insert(key, CacheEntry { value, expires_at });
    }

    /// Force-evict a single entry
    pub async fn invalidate(&self, key: &K) {
        let mut entries = self.entries.write().await;
        entries.remove(key);
    }

    /// Drop every entry
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_hit_and_expired_miss() {
        let cache: ExpiringCache<String, u32> = ExpiringCache::new();

        cache
            .insert("live".to_string(), 1, Utc::now() + Duration::hours(1))
            .await;
        cache
            .insert("dead".to_string(), 2, Utc::now() - Duration::seconds(1))
            .await;

        assert_eq!(
            cache.get_fresh(&"live".to_string(), Duration::zero()).await,
            Some(1)
        );
        assert_eq!(
            cache.get_fresh(&"dead".to_string(), Duration::zero()).await,
            None
        );
    }

    #[tokio::test]
    async fn test_safety_buffer_counts_as_miss() {
        let cache: ExpiringCache<String, u32> = ExpiringCache::new();

        // Expires in 2 minutes: fresh without a buffer, stale with a 5-minute one.
        cache
            .insert("soon".to_string(), 7, Utc::now() + Duration::minutes(2))
            .await;

        assert_eq!(
            cache.get_fresh(&"soon".to_string(), Duration::zero()).await,
            Some(7)
        );
        assert_eq!(
            cache
                .get_fresh(&"soon".to_string(), Duration::minutes(5))
                .await,
            None
        );
    }

    #[tokio::test]
    async fn test_insert_replaces_wholesale() {
        let cache: ExpiringCache<String, u32> = ExpiringCache::new();
        let key = "k".to_string();

        cache.insert(key.clone(), 1, Utc::now() + Duration::hours(1)).await;
        cache.insert(key.clone(), 2, Utc::now() + Duration::hours(2)).await;

        assert_eq!(cache.get_fresh(&key, Duration::zero()).await, Some(2));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache: ExpiringCache<String, u32> = ExpiringCache::new();
        let key = "k".to_string();

        cache.insert(key.clone(), 1, Utc::now() + Duration::hours(1)).await;
        cache.invalidate(&key).await;

        assert_eq!(cache.get_fresh(&key, Duration::zero()).await, None);
        assert_eq!(cache.len().await, 0);
    }
}
