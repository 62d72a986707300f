//! Generic adapter that keeps sessions in any key-value cache.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{Result, StorageError};

use super::id::DEFAULT_MAX_ATTEMPTS;
use super::store::{Cleaner, SessionStore};
use super::SessionRecord;

/// Minimal contract a cache must offer to hold sessions.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Short cache name used in logs.
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key` for `ttl_secs` seconds.
    async fn put(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    async fn forget(&self, key: &str) -> Result<()>;

    /// Remove sessions under `prefix` idle since before `threshold`.
    ///
    /// Caches that evict entries by TTL on their own keep the default, which
    /// removes nothing.
    async fn sweep(&self, _prefix: &str, _threshold: i64) -> Result<u64> {
        Ok(0)
    }
}

/// True when `raw` is a serialized session last active before `threshold`.
pub fn is_stale(raw: &str, threshold: i64) -> bool {
    serde_json::from_str::<SessionRecord>(raw)
        .ok()
        .and_then(|r| r.last_activity)
        .is_some_and(|last| last < threshold)
}

/// Session store over a [`KeyValueCache`].
///
/// Records are stored as JSON under `{prefix}{id}` with a TTL equal to the
/// session lifetime.
pub struct CacheSessionStore<C: KeyValueCache> {
    cache: Arc<C>,
    prefix: String,
    id_attempts: usize,
}

impl<C: KeyValueCache> CacheSessionStore<C> {
    pub fn new(cache: Arc<C>, prefix: impl Into<String>) -> Self {
        Self {
            cache,
            prefix: prefix.into(),
            id_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_id_attempts(mut self, attempts: usize) -> Self {
        self.id_attempts = attempts;
        self
    }

    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }

    fn cache_key(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }
}

#[async_trait]
impl<C: KeyValueCache> SessionStore for CacheSessionStore<C> {
    fn name(&self) -> &str {
        self.cache.name()
    }

    async fn load(&self, key: &str) -> Result<Option<SessionRecord>> {
        let Some(raw) = self.cache.get(&self.cache_key(key)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("{}: discarding unreadable session {}: {}", self.cache.name(), key, e);
                Ok(None)
            }
        }
    }

    async fn save(
        &self,
        session: &SessionRecord,
        config: &SessionConfig,
        _exists: bool,
    ) -> Result<()> {
        let raw = serde_json::to_string(session).map_err(StorageError::from)?;
        let ttl = config.lifetime_secs().max(1) as u64;
        debug!("{}: save {} (ttl {}s)", self.cache.name(), session.id, ttl);
        self.cache.put(&self.cache_key(&session.id), &raw, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.cache.forget(&self.cache_key(key)).await
    }

    fn id_attempts(&self) -> usize {
        self.id_attempts
    }

    fn cleaner(&self) -> Option<&dyn Cleaner> {
        Some(self)
    }
}

#[async_trait]
impl<C: KeyValueCache> Cleaner for CacheSessionStore<C> {
    async fn clean(&self, threshold: i64) -> Result<u64> {
        let removed = self.cache.sweep(&self.prefix, threshold).await?;
        if removed > 0 {
            info!("{}: swept {} stale sessions", self.cache.name(), removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SharedMemoryCache;
    use serde_json::json;

    /// Cache that relies on its own TTL eviction.
    #[derive(Default)]
    struct TtlOnlyCache {
        entries: dashmap::DashMap<String, (String, u64)>,
    }

    #[async_trait]
    impl KeyValueCache for TtlOnlyCache {
        fn name(&self) -> &str {
            "ttl-only"
        }

        async fn get(&self, key: &str) -> Result<Option<String>> {
            Ok(self.entries.get(key).map(|e| e.value().0.clone()))
        }

        async fn put(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
            self.entries.insert(key.to_string(), (value.to_string(), ttl_secs));
            Ok(())
        }

        async fn forget(&self, key: &str) -> Result<()> {
            self.entries.remove(key);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_records_are_prefixed_and_ttl_follows_lifetime() {
        let cache = Arc::new(TtlOnlyCache::default());
        let store = CacheSessionStore::new(cache.clone(), "sess:");
        let config = SessionConfig {
            lifetime: 5,
            ..Default::default()
        };

        let mut record = store.fresh().await.unwrap();
        record.data.values.insert("k".into(), json!("v"));
        store.save(&record, &config, false).await.unwrap();

        let entry = cache.entries.get(&format!("sess:{}", record.id)).unwrap();
        assert_eq!(entry.value().1, 300);
        drop(entry);

        assert_eq!(store.load(&record.id).await.unwrap().unwrap(), record);
        store.delete(&record.id).await.unwrap();
        assert!(store.load(&record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_default_sweep_removes_nothing() {
        let store = CacheSessionStore::new(Arc::new(TtlOnlyCache::default()), "sess:");
        let mut record = SessionRecord::new("x");
        record.last_activity = Some(1);
        store.save(&record, &SessionConfig::default(), false).await.unwrap();
        assert_eq!(store.cleaner().unwrap().clean(i64::MAX).await.unwrap(), 0);
        assert!(store.load("x").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_garbage_entry_is_absent() {
        let cache = Arc::new(TtlOnlyCache::default());
        cache.put("sess:junk", "{{{", 60).await.unwrap();
        let store = CacheSessionStore::new(cache, "sess:");
        assert!(store.load("junk").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shared_cache_sweep_through_adapter() {
        let store = CacheSessionStore::new(Arc::new(SharedMemoryCache::new()), "sess:");
        let config = SessionConfig::default();
        let mut stale = SessionRecord::new("stale");
        stale.last_activity = Some(10);
        let mut live = SessionRecord::new("live");
        live.last_activity = Some(1_000);
        store.save(&stale, &config, false).await.unwrap();
        store.save(&live, &config, false).await.unwrap();

        assert_eq!(store.cleaner().unwrap().clean(500).await.unwrap(), 1);
        assert!(store.load("stale").await.unwrap().is_none());
        assert!(store.load("live").await.unwrap().is_some());
    }

    #[test]
    fn test_is_stale() {
        assert!(is_stale(r#"{"id":"a","last_activity":5}"#, 10));
        assert!(!is_stale(r#"{"id":"a","last_activity":15}"#, 10));
        assert!(!is_stale(r#"{"id":"a"}"#, 10));
        assert!(!is_stale("garbage", 10));
    }
}
