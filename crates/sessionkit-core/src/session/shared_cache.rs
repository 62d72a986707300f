use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;
use crate::util::unix_now;

use super::cache_store::{is_stale, KeyValueCache};

static GLOBAL: OnceLock<Arc<SharedMemoryCache>> = OnceLock::new();

struct Entry {
    value: String,
    /// Unix seconds after which the entry is gone.
    expires_at: i64,
}

/// Process-wide shared-memory cache with per-entry TTL.
///
/// Every worker task in the process sees the same entries when it uses
/// [`SharedMemoryCache::global`].
#[derive(Default)]
pub struct SharedMemoryCache {
    entries: DashMap<String, Entry>,
}

impl SharedMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide instance.
    pub fn global() -> Arc<Self> {
        GLOBAL.get_or_init(|| Arc::new(Self::new())).clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueCache for SharedMemoryCache {
    fn name(&self) -> &str {
        "shared"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = unix_now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let expires_at = unix_now().saturating_add(ttl_secs as i64);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn sweep(&self, prefix: &str, threshold: i64) -> Result<u64> {
        let now = unix_now();
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .filter(|e| e.expires_at <= now || is_stale(&e.value, threshold))
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for key in doomed {
            if self.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
