use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Entry stored in the local DashMap with an expiry timestamp.
#[derive(Clone)]
pub(crate) struct CacheEntry {
    value: String,
    pub(crate) expires_at: Instant,
}

/// Two-tier cache: in-memory DashMap (tier 1) optionally backed by Redis
/// (tier 2). The token repository stays the source of truth and is handled
/// by callers.
///
/// Local entries honour their TTL on read and are evicted lazily;
/// `evict_expired()` bounds memory from the background sweep.
#[derive(Clone)]
pub struct TieredCache {
    pub(crate) local: Arc<DashMap<String, CacheEntry>>,
    redis: Option<ConnectionManager>,
}

impl TieredCache {
    pub fn new(redis: Option<ConnectionManager>) -> Self {
        Self {
            local: Arc::new(DashMap::new()),
            redis,
        }
    }

    /// Local-only cache, used when no Redis is configured and in tests.
    pub fn local_only() -> Self {
        Self::new(None)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        // tier 1: in-memory (with TTL check)
        if let Some(entry) = self.local.get(key) {
            if Instant::now() < entry.expires_at {
                return serde_json::from_str(&entry.value).ok();
            }
            // expired, drop the ref before removing
            drop(entry);
            self.local.remove(key);
        }

        // tier 2: redis
        let mut conn = self.redis.clone()?;
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(v)) => {
                // Re-use the Redis TTL for the local entry.
                let ttl_secs: i64 = conn.ttl(key).await.unwrap_or(60);
                let ttl = if ttl_secs > 0 {
                    Duration::from_secs(ttl_secs as u64)
                } else {
                    Duration::from_secs(60)
                };
                self.local.insert(
                    key.to_string(),
                    CacheEntry {
                        value: v.clone(),
                        expires_at: Instant::now() + ttl,
                    },
                );
                serde_json::from_str(&v).ok()
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = key, "redis cache read failed: {}", e);
                None
            }
        }
    }

    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> anyhow::Result<()> {
        let json = serde_json::to_string(value)?;
        self.local.insert(
            key.to_string(),
            CacheEntry {
                value: json.clone(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );

        if let Some(mut conn) = self.redis.clone() {
            conn.set_ex::<_, _, ()>(key, json, ttl_secs).await?;
        }
        Ok(())
    }

    /// Drop a key from both tiers.
    pub async fn invalidate(&self, key: &str) -> anyhow::Result<()> {
        self.local.remove(key);
        if let Some(mut conn) = self.redis.clone() {
            conn.del::<_, ()>(key).await?;
        }
        Ok(())
    }

    /// Remove all locally-expired entries. Returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.local.len();
        self.local.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.local.len())
    }

    /// Current number of entries in the local cache (for metrics / debugging).
    pub fn local_len(&self) -> usize {
        self.local.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_roundtrip_and_invalidate() {
        let cache = TieredCache::local_only();
        cache.set("k", &vec!["fcs:read".to_string()], 60).await.unwrap();
        let got: Option<Vec<String>> = cache.get("k").await;
        assert_eq!(got, Some(vec!["fcs:read".to_string()]));

        cache.invalidate("k").await.unwrap();
        let got: Option<Vec<String>> = cache.get("k").await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_expired_entries_are_not_served() {
        let cache = TieredCache::local_only();
        cache.set("k", &1u32, 0).await.unwrap();
        let got: Option<u32> = cache.get("k").await;
        assert!(got.is_none());
        assert_eq!(cache.local_len(), 0);
    }

    #[tokio::test]
    async fn test_evict_expired() {
        let cache = TieredCache::local_only();
        cache.set("stale", &1u32, 0).await.unwrap();
        cache.set("fresh", &2u32, 60).await.unwrap();
        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.local_len(), 1);
    }
}
