use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Payload plus the time it was fetched from MT5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_seconds(&self) -> i64 {
        (Utc::now() - self.cached_at).num_seconds().max(0)
    }
}

/// Which store the process settled on at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Redis,
    Memory,
}

impl fmt::Display for CacheBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheBackend::Redis => f.write_str("redis"),
            CacheBackend::Memory => f.write_str("memory"),
        }
    }
}

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// Process-local map with lazy expiry: nothing sweeps it, an entry read
/// after its deadline is removed and reported absent.
#[derive(Default)]
struct MemoryStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                debug!(key, "Cache entry expired");
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let entry = MemoryEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().await.insert(key.to_string(), entry);
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

enum Store {
    Redis(ConnectionManager),
    Memory(MemoryStore),
}

/// Key/value cache facade.
///
/// The backend is picked once in `connect` and never changes: Redis when
/// configured and answering PING at startup, otherwise the in-memory map.
/// A Redis error on a single call is logged and treated as a miss.
pub struct CacheManager {
    store: Store,
}

impl CacheManager {
    pub fn in_memory() -> Self {
        Self {
            store: Store::Memory(MemoryStore::default()),
        }
    }

    pub async fn connect(redis_url: Option<&str>) -> Self {
        match redis_url.filter(|url| !url.is_empty()) {
            Some(url) => match Self::connect_redis(url).await {
                Ok(manager) => {
                    info!("Redis connected successfully");
                    Self {
                        store: Store::Redis(manager),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Redis connection failed, using in-memory cache");
                    Self::in_memory()
                }
            },
            None => {
                info!("No Redis URL provided, using in-memory cache");
                Self::in_memory()
            }
        }
    }

    async fn connect_redis(url: &str) -> redis::RedisResult<ConnectionManager> {
        let client = redis::Client::open(url)?;
        let mut manager = ConnectionManager::new(client).await?;
        let _: String = redis::cmd("PING").query_async(&mut manager).await?;
        Ok(manager)
    }

    pub fn backend(&self) -> CacheBackend {
        match self.store {
            Store::Redis(_) => CacheBackend::Redis,
            Store::Memory(_) => CacheBackend::Memory,
        }
    }

    /// Backend liveness. The in-memory map is always up.
    pub async fn ping(&self) -> bool {
        match &self.store {
            Store::Redis(manager) => {
                let mut conn = manager.clone();
                let result: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
                if let Err(ref e) = result {
                    warn!(error = %e, "Redis ping failed");
                }
                result.is_ok()
            }
            Store::Memory(_) => true,
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        match &self.store {
            Store::Redis(manager) => {
                let mut conn = manager.clone();
                match conn.get::<_, Option<String>>(key).await {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(key, error = %e, "Redis GET failed");
                        None
                    }
                }
            }
            Store::Memory(store) => store.get(key).await,
        }
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Duration) {
        match &self.store {
            Store::Redis(manager) => {
                let mut conn = manager.clone();
                // SETEX rejects a zero expiry
                let seconds = ttl.as_secs().max(1);
                if let Err(e) = conn.set_ex::<_, _, ()>(key, value, seconds).await {
                    warn!(key, error = %e, "Redis SETEX failed");
                }
            }
            Store::Memory(store) => store.set(key, value.to_string(), ttl).await,
        }
    }

    /// Load a JSON value, treating undecodable entries as misses
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key, error = %e, "Failed to parse cache entry");
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set(key, &raw, ttl).await,
            Err(e) => warn!(key, error = %e, "Failed to serialize cache entry"),
        }
    }

    /// Number of entries held locally (expired ones included until read).
    /// Always 0 for Redis.
    #[cfg(test)]
    pub(crate) async fn local_len(&self) -> usize {
        match &self.store {
            Store::Redis(_) => 0,
            Store::Memory(store) => store.len().await,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_memory_entry_expires_lazily() {
        let cache = CacheManager::in_memory();
        cache.set("k", "v", Duration::from_secs(1)).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));

        tokio::time::advance(Duration::from_millis(1100)).await;
        // Still stored until someone reads it
        assert_eq!(cache.local_len().await, 1);
        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.local_len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_overwrite_refreshes_expiry() {
        let cache = CacheManager::in_memory();
        cache.set("k", "old", Duration::from_secs(1)).await;
        tokio::time::advance(Duration::from_millis(900)).await;
        cache.set("k", "new", Duration::from_secs(1)).await;
        tokio::time::advance(Duration::from_millis(900)).await;

        assert_eq!(cache.get("k").await.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let cache = CacheManager::in_memory();
        assert_eq!(cache.get("absent").await, None);
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let cache = CacheManager::in_memory();
        let cached = CachedData::new(serde_json::json!({ "login": "46108", "balance": 1000 }));
        cache.set_json("user:46108", &cached, Duration::from_secs(60)).await;

        let loaded: CachedData<serde_json::Value> = cache.get_json("user:46108").await.unwrap();
        assert_eq!(loaded.data["balance"], 1000);

        cache.set("broken", "{not json", Duration::from_secs(60)).await;
        assert!(cache.get_json::<serde_json::Value>("broken").await.is_none());
    }

    #[tokio::test]
    async fn test_connect_without_url_uses_memory() {
        assert_eq!(CacheManager::connect(None).await.backend(), CacheBackend::Memory);
        assert_eq!(CacheManager::connect(Some("")).await.backend(), CacheBackend::Memory);
    }

    #[tokio::test]
    async fn test_connect_with_bad_url_falls_back_to_memory() {
        let cache = CacheManager::connect(Some("not-a-redis-url")).await;
        assert_eq!(cache.backend(), CacheBackend::Memory);
        assert!(cache.ping().await);
    }

    #[test]
    fn test_cached_data_age() {
        let cached = CachedData::new(1);
        assert!(cached.age_seconds() <= 1);

        let mut old = CachedData::new(1);
        old.cached_at = Utc::now() - chrono::Duration::seconds(90);
        assert!(old.age_seconds() >= 90);
    }
}
