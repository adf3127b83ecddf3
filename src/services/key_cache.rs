use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Prefix applied to every key-set entry written by the token verifier.
pub const PUBLIC_KEY_PREFIX: &str = "PUB_KEY_";

/// String key-value store with per-entry expiry.
///
/// Concurrent writers to the same key race with last-write-wins; values are
/// always refetchable so that is acceptable.
#[async_trait]
pub trait KeyCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KeyCacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KeyCacheError>;

    async fn delete(&self, key: &str) -> Result<(), KeyCacheError>;
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// In-process cache, used when no Redis is configured and in tests.
#[derive(Default)]
pub struct MemoryKeyCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryKeyCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyCache for MemoryKeyCache {
    async fn get(&self, key: &str) -> Result<Option<String>, KeyCacheError> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired: drop it so the map does not grow with dead entries.
        let mut entries = self.entries.write().await;
        if entries
            .get(key)
            .is_some_and(|entry| entry.expires_at <= Instant::now())
        {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KeyCacheError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KeyCacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Redis-backed cache, shared across service instances.
pub struct RedisKeyCache {
    client: redis::Client,
}

impl RedisKeyCache {
    pub fn new(redis_url: &str) -> Result<Self, KeyCacheError> {
        let client = redis::Client::open(redis_url).map_err(KeyCacheError::Redis)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl KeyCache for RedisKeyCache {
    async fn get(&self, key: &str) -> Result<Option<String>, KeyCacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KeyCacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        // Redis rejects EX 0.
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, seconds).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KeyCacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}

/// Namespaces another cache by prepending a fixed prefix to every key.
pub struct PrefixedKeyCache {
    inner: Arc<dyn KeyCache>,
    prefix: String,
}

impl PrefixedKeyCache {
    pub fn new(inner: Arc<dyn KeyCache>, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl KeyCache for PrefixedKeyCache {
    async fn get(&self, key: &str) -> Result<Option<String>, KeyCacheError> {
        self.inner.get(&self.scoped(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KeyCacheError> {
        self.inner.set(&self.scoped(key), value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), KeyCacheError> {
        self.inner.delete(&self.scoped(key)).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KeyCacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
