//! # cache
//!
//! Short-TTL key/value cache in front of the stores. The cache is an
//! accelerator only: every read falls back to the store, and cache errors are
//! logged and treated as misses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::Result;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
    async fn forget(&self, key: &str) -> Result<()>;
    /// Drops every key matching a glob with `*` wildcards.
    async fn forget_pattern(&self, pattern: &str) -> Result<()>;
}

// ── Keys ──────────────────────────────────────────────────────────────────────

pub mod keys {
    use uuid::Uuid;

    pub fn position(vehicle_id: &str) -> String {
        format!("position:{vehicle_id}")
    }

    pub fn session(session_id: Uuid) -> String {
        format!("session:{session_id}")
    }

    pub fn trust(device_id: &str) -> String {
        format!("trust:{device_id}")
    }

    pub fn deactivated(device_id: &str) -> String {
        format!("deactivated:{device_id}")
    }
}

// ── JSON helpers ──────────────────────────────────────────────────────────────

/// Reads and decodes a cached value. Any failure is a miss.
pub async fn cache_get_json<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> Option<T> {
    match cache.get(key).await {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("cache entry {key} undecodable, ignoring: {e}");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!("cache read {key} failed: {e}");
            None
        }
    }
}

pub async fn cache_put_json<T: Serialize + Sync>(
    cache: &dyn Cache,
    key: &str,
    value: &T,
    ttl: Duration,
) {
    let raw = match serde_json::to_string(value) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("cache encode {key} failed: {e}");
            return;
        }
    };
    if let Err(e) = cache.put(key, raw, ttl).await {
        warn!("cache write {key} failed: {e}");
    }
}

pub async fn cache_forget(cache: &dyn Cache, key: &str) {
    if let Err(e) = cache.forget(key).await {
        warn!("cache forget {key} failed: {e}");
    }
}

/// `*` matches any run of characters, everything else is literal.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }
    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !key.starts_with(first) || key.len() < first.len() + last.len() || !key.ends_with(last) {
        return false;
    }
    let mut rest = &key[first.len()..key.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    true
}

// ── In-memory ─────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, (String, Instant)>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((v, expires)) if *expires > Instant::now() => return Ok(Some(v.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn forget_pattern(&self, pattern: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .retain(|k, _| !glob_match(pattern, k));
        Ok(())
    }
}

// ── Redis ─────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct RedisCache {
    conn: MultiplexedConnection,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, secs).await?;
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn forget_pattern(&self, pattern: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let matched: Vec<String> = conn.keys(pattern).await?;
        if !matched.is_empty() {
            conn.del::<_, ()>(matched).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackingError;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("position:*", "position:bus-1"));
        assert!(glob_match("*:bus-1", "position:bus-1"));
        assert!(glob_match("trust:*:x", "trust:abc:x"));
        assert!(!glob_match("position:*", "trust:bus-1"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }

    #[tokio::test]
    async fn test_memory_cache_ttl_expiry() {
        let cache = MemoryCache::new();
        cache.put("k", "v".into(), Duration::from_millis(20)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_forget_pattern() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.put("position:a", "1".into(), ttl).await.unwrap();
        cache.put("position:b", "2".into(), ttl).await.unwrap();
        cache.put("trust:a", "3".into(), ttl).await.unwrap();
        cache.forget_pattern("position:*").await.unwrap();
        assert!(cache.get("position:a").await.unwrap().is_none());
        assert!(cache.get("trust:a").await.unwrap().is_some());
    }

    struct BrokenCache;

    #[async_trait]
    impl Cache for BrokenCache {
        async fn get(&self, _: &str) -> Result<Option<String>> {
            Err(TrackingError::Cache("down".into()))
        }
        async fn put(&self, _: &str, _: String, _: Duration) -> Result<()> {
            Err(TrackingError::Cache("down".into()))
        }
        async fn forget(&self, _: &str) -> Result<()> {
            Err(TrackingError::Cache("down".into()))
        }
        async fn forget_pattern(&self, _: &str) -> Result<()> {
            Err(TrackingError::Cache("down".into()))
        }
    }

    #[tokio::test]
    async fn test_cache_errors_are_misses() {
        let got: Option<f64> = cache_get_json(&BrokenCache, "trust:x").await;
        assert!(got.is_none());
        // must not panic
        cache_put_json(&BrokenCache, "trust:x", &0.5, Duration::from_secs(1)).await;
    }
}
