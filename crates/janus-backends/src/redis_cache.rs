//! Redis-backed query result cache.
//!
//! Caches routed query results to reduce latency and compute load for
//! repeated queries. The cache is never authoritative; any backend error
//! degrades to a miss.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `REDIS_ENABLED`: Set to "false" to disable caching (default: true)
//! - `REDIS_URL`: Redis connection URL (default: redis://localhost:6379)
//! - `REDIS_CACHE_TTL`: Cache TTL in seconds (default: 300)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use janus_core::{defaults, QueryCache};

/// Query cache backed by Redis.
#[derive(Clone)]
pub struct RedisQueryCache {
    inner: Arc<RedisCacheInner>,
}

struct RedisCacheInner {
    /// Redis connection manager (None if disabled).
    connection: RwLock<Option<ConnectionManager>>,
    /// Default TTL in seconds.
    ttl_seconds: u64,
    /// Whether caching is enabled.
    enabled: bool,
}

impl RedisQueryCache {
    /// Create a new cache from environment configuration.
    pub async fn from_env() -> Self {
        let enabled = std::env::var("REDIS_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| defaults::REDIS_URL.to_string());

        let ttl_seconds: u64 = std::env::var("REDIS_CACHE_TTL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults::CACHE_TTL_SECS);

        let connection = if enabled {
            match redis::Client::open(redis_url.as_str()) {
                Ok(client) => match ConnectionManager::new(client).await {
                    Ok(conn) => {
                        info!("Redis query cache enabled (TTL: {}s)", ttl_seconds);
                        Some(conn)
                    }
                    Err(e) => {
                        warn!("Failed to connect to Redis, cache disabled: {}", e);
                        None
                    }
                },
                Err(e) => {
                    warn!("Invalid Redis URL, cache disabled: {}", e);
                    None
                }
            }
        } else {
            info!("Redis query cache disabled via REDIS_ENABLED=false");
            None
        };

        Self {
            inner: Arc::new(RedisCacheInner {
                connection: RwLock::new(connection),
                ttl_seconds,
                enabled,
            }),
        }
    }

    /// Create a disabled cache (for testing or when Redis is unavailable).
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(RedisCacheInner {
                connection: RwLock::new(None),
                ttl_seconds: defaults::CACHE_TTL_SECS,
                enabled: false,
            }),
        }
    }

    /// Check if caching is enabled and connected.
    pub async fn is_connected(&self) -> bool {
        self.inner.enabled && self.inner.connection.read().await.is_some()
    }

    /// Get the default TTL setting.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.inner.ttl_seconds)
    }
}

#[async_trait]
impl QueryCache for RedisQueryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut conn_guard = self.inner.connection.write().await;
        let conn = conn_guard.as_mut()?;

        match conn.get::<_, Option<Vec<u8>>>(key).await {
            Ok(Some(data)) => {
                debug!("Cache HIT: {}", key);
                Some(data)
            }
            Ok(None) => {
                debug!("Cache MISS: {}", key);
                None
            }
            Err(e) => {
                error!("Redis GET error: {}", e);
                None
            }
        }
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> bool {
        let mut conn_guard = self.inner.connection.write().await;
        let conn = match conn_guard.as_mut() {
            Some(c) => c,
            None => return false,
        };

        let ttl_secs = ttl.as_secs().max(1);
        match conn.set_ex::<_, _, ()>(key, value, ttl_secs).await {
            Ok(_) => {
                debug!("Cache SET: {} (TTL: {}s)", key, ttl_secs);
                true
            }
            Err(e) => {
                error!("Redis SET error: {}", e);
                false
            }
        }
    }
}
