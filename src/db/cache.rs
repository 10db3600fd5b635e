use async_trait::async_trait;
use lru::LruCache;
use std::fmt::Display;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{AppError, AppResult};
use crate::models::{MovieId, UserId};

/// Prefix shared by every result cache key
pub const KEY_PREFIX: &str = "rec:";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    UserRecommendations { user_id: UserId, limit: usize },
    SimilarMovies { movie_id: MovieId, limit: usize },
    UserVectorRecommendations { user_id: UserId, limit: usize },
    SemanticSearch { query: String, limit: usize },
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::UserRecommendations { user_id, limit } => {
                write!(f, "{}user:{}:{}", KEY_PREFIX, user_id, limit)
            }
            CacheKey::SimilarMovies { movie_id, limit } => {
                write!(f, "{}similar:{}:{}", KEY_PREFIX, movie_id, limit)
            }
            CacheKey::UserVectorRecommendations { user_id, limit } => {
                write!(f, "{}uvec:{}:{}", KEY_PREFIX, user_id, limit)
            }
            // Embedding models are case sensitive, so only whitespace is normalised
            CacheKey::SemanticSearch { query, limit } => {
                write!(f, "{}semantic:{}:{}", KEY_PREFIX, query.trim(), limit)
            }
        }
    }
}

/// Performance layer in front of recommendation results
///
/// Values are opaque JSON strings. A miss must always be recomputable from
/// the stores, so backends may drop entries at any time.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get_raw(&self, key: &CacheKey) -> AppResult<Option<String>>;

    /// Stores without waiting for the backend to acknowledge
    fn put_raw(&self, key: &CacheKey, value: String, ttl: Duration);

    /// Drops every cached result
    async fn invalidate_all(&self) -> AppResult<()>;
}

impl dyn ResultCache {
    /// Retrieves and deserializes a cached value
    ///
    /// Backend or decoding failures are logged and reported as a miss.
    pub async fn get_from_cache<T: serde::de::DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> AppResult<Option<T>> {
        let cached = match self.get_raw(key).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Cache read failed, treating as miss");
                return Ok(None);
            }
        };

        match cached {
            Some(json) => match serde_json::from_str(&json) {
                Ok(data) => Ok(Some(data)),
                Err(e) => {
                    tracing::warn!(
                        error = %AppError::Internal(format!("Cache deserialization error: {}", e)),
                        key = %key,
                        "Discarding undecodable cache entry"
                    );
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Serializes and stores a value without blocking the caller
    pub fn set_in_background<T: serde::Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) {
        match serde_json::to_string(value) {
            Ok(json) => self.put_raw(key, json, ttl),
            Err(e) => tracing::error!(error = %e, "Cache serialization error"),
        }
    }
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Bounded in-process cache: least-recently-used eviction plus a per-entry TTL
pub struct MemoryCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, CacheEntry>> {
        // Entries are plain data, a panic mid-update cannot leave them torn
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lookup(&self, key: &str, now: Instant) -> Option<String> {
        let mut entries = self.lock();
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    fn insert(&self, key: String, value: String, expires_at: Instant) {
        self.lock().put(key, CacheEntry { value, expires_at });
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            len: self.lock().len(),
        }
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get_raw(&self, key: &CacheKey) -> AppResult<Option<String>> {
        let value = self.lookup(&key.to_string(), Instant::now());
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(value)
    }

    fn put_raw(&self, key: &CacheKey, value: String, ttl: Duration) {
        self.insert(key.to_string(), value, Instant::now() + ttl);
    }

    async fn invalidate_all(&self) -> AppResult<()> {
        self.lock().clear();
        tracing::debug!("In-process result cache cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn user_key(user_id: UserId) -> CacheKey {
        CacheKey::UserRecommendations { user_id, limit: 12 }
    }

    #[test]
    fn test_cache_key_display_user_recommendations() {
        assert_eq!(user_key(42).to_string(), "rec:user:42:12");
    }

    #[test]
    fn test_cache_key_display_similar_movies() {
        let key = CacheKey::SimilarMovies {
            movie_id: 7,
            limit: 10,
        };
        assert_eq!(key.to_string(), "rec:similar:7:10");
    }

    #[test]
    fn test_cache_key_display_semantic_search_keeps_case() {
        let key = CacheKey::SemanticSearch {
            query: "  Space OPERA ".to_string(),
            limit: 5,
        };
        assert_eq!(key.to_string(), "rec:semantic:Space OPERA:5");

        let lower = CacheKey::SemanticSearch {
            query: "space opera".to_string(),
            limit: 5,
        };
        assert_ne!(key.to_string(), lower.to_string());
    }

    #[tokio::test]
    async fn test_memory_cache_hit_and_miss() {
        let cache = MemoryCache::new(10);
        assert_eq!(cache.get_raw(&user_key(1)).await.unwrap(), None);

        cache.put_raw(&user_key(1), "[1,2,3]".to_string(), Duration::from_secs(60));
        assert_eq!(
            cache.get_raw(&user_key(1)).await.unwrap(),
            Some("[1,2,3]".to_string())
        );

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.len, 1);
    }

    #[tokio::test]
    async fn test_memory_cache_evicts_least_recently_used() {
        let cache = MemoryCache::new(2);
        let ttl = Duration::from_secs(60);
        cache.put_raw(&user_key(1), "a".to_string(), ttl);
        cache.put_raw(&user_key(2), "b".to_string(), ttl);

        // Touch 1 so that 2 becomes the eviction candidate
        assert!(cache.get_raw(&user_key(1)).await.unwrap().is_some());
        cache.put_raw(&user_key(3), "c".to_string(), ttl);

        assert!(cache.get_raw(&user_key(1)).await.unwrap().is_some());
        assert!(cache.get_raw(&user_key(2)).await.unwrap().is_none());
        assert!(cache.get_raw(&user_key(3)).await.unwrap().is_some());
        assert_eq!(cache.stats().len, 2);
    }

    #[test]
    fn test_memory_cache_expires_entries() {
        let cache = MemoryCache::new(10);
        let now = Instant::now();
        cache.insert("rec:user:1:12".to_string(), "a".to_string(), now);

        assert_eq!(cache.lookup("rec:user:1:12", now), None);
        assert_eq!(cache.stats().len, 0);
    }

    #[tokio::test]
    async fn test_invalidate_all_clears_entries() {
        let cache = MemoryCache::new(10);
        cache.put_raw(&user_key(1), "a".to_string(), Duration::from_secs(60));
        cache.invalidate_all().await.unwrap();
        assert_eq!(cache.get_raw(&user_key(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_typed_round_trip_through_trait_object() {
        let cache: Arc<dyn ResultCache> = Arc::new(MemoryCache::new(10));
        cache.set_in_background(&user_key(5), &vec![3_i64, 1, 2], Duration::from_secs(60));

        let cached: Option<Vec<i64>> = cache.get_from_cache(&user_key(5)).await.unwrap();
        assert_eq!(cached, Some(vec![3, 1, 2]));
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let cache: Arc<dyn ResultCache> = Arc::new(MemoryCache::new(10));
        cache.put_raw(&user_key(5), "not json".to_string(), Duration::from_secs(60));

        let cached: Option<Vec<i64>> = cache.get_from_cache(&user_key(5)).await.unwrap();
        assert_eq!(cached, None);
    }

    proptest! {
        #[test]
        fn prop_memory_cache_stays_bounded(
            capacity in 1usize..8,
            users in prop::collection::vec(0i64..20, 0..60),
        ) {
            let cache = MemoryCache::new(capacity);
            for user_id in &users {
                cache.put_raw(&user_key(*user_id), user_id.to_string(), Duration::from_secs(60));
            }
            prop_assert!(cache.stats().len <= capacity);

            // The most recent write always survives
            if let Some(last) = users.last() {
                let hit = tokio_test::block_on(cache.get_raw(&user_key(*last))).unwrap();
                prop_assert_eq!(hit, Some(last.to_string()));
            }
        }
    }
}
