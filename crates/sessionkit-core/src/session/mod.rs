pub mod id;
pub mod store;
pub mod cookie;
pub mod memory_store;
pub mod cookie_store;
pub mod cache_store;
pub mod shared_cache;
pub mod payload;
pub mod manager;

#[cfg(feature = "file-backend")]
pub mod file_store;

#[cfg(feature = "database-backend")]
pub mod database_store;

#[cfg(feature = "redis-backend")]
pub mod redis_cache;

#[cfg(feature = "memcached-backend")]
pub mod memcached_cache;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub use cache_store::{CacheSessionStore, KeyValueCache};
pub use cookie::{Cookie, CookieJar, MemoryCookieJar};
pub use cookie_store::CookieSessionStore;
pub use manager::{SessionManager, StoreResolver};
pub use memory_store::MemorySessionStore;
pub use payload::{Payload, SaveReport};
pub use shared_cache::SharedMemoryCache;
pub use store::{Cleaner, SessionStore};

#[cfg(feature = "file-backend")]
pub use file_store::FileSessionStore;

#[cfg(feature = "database-backend")]
pub use database_store::DatabaseSessionStore;

#[cfg(feature = "redis-backend")]
pub use redis_cache::RedisCache;

#[cfg(feature = "memcached-backend")]
pub use memcached_cache::MemcachedCache;

/// Key of the CSRF token inside the persistent partition.
pub const CSRF_TOKEN: &str = "csrf_token";

/// Serialized name of the partition holding flash data written this request.
pub const NEW_FLASH: &str = ":new:";

/// Serialized name of the partition holding flash data from the previous request.
pub const OLD_FLASH: &str = ":old:";

/// Session data: persistent values plus two generations of flash data.
///
/// On the wire the persistent values sit at the top level next to the
/// reserved `:new:` and `:old:` keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(rename = ":new:", default)]
    pub new: HashMap<String, Value>,
    #[serde(rename = ":old:", default)]
    pub old: HashMap<String, Value>,
    #[serde(flatten)]
    pub values: HashMap<String, Value>,
}

/// The unit persisted by a session store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    #[serde(default)]
    pub data: SessionData,
    /// Unix timestamp (seconds) of the last save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<i64>,
}

impl SessionRecord {
    /// A record with empty partitions and no activity yet.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: SessionData::default(),
            last_activity: None,
        }
    }

    /// Expired iff it has been saved before and sat idle longer than the lifetime.
    pub fn is_expired(&self, lifetime_secs: i64, now: i64) -> bool {
        match self.last_activity {
            Some(last) => now.saturating_sub(last) > lifetime_secs,
            None => false,
        }
    }
}

/// Keys that collide with the flash partitions on the wire.
pub fn is_reserved_key(key: &str) -> bool {
    key == NEW_FLASH || key == OLD_FLASH
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_new_is_empty() {
        let record = SessionRecord::new("abc");
        assert_eq!(record.id, "abc");
        assert!(record.data.values.is_empty());
        assert!(record.data.new.is_empty());
        assert!(record.data.old.is_empty());
        assert!(record.last_activity.is_none());
    }

    #[test]
    fn test_expiry_boundaries() {
        let mut record = SessionRecord::new("abc");
        assert!(!record.is_expired(60, 1_000_000));

        record.last_activity = Some(1_000_000 - 60);
        assert!(!record.is_expired(60, 1_000_000));

        record.last_activity = Some(1_000_000 - 61);
        assert!(record.is_expired(60, 1_000_000));
    }

    #[test]
    fn test_unbounded_lifetime_never_expires() {
        let config = crate::config::SessionConfig {
            lifetime: u64::MAX,
            ..Default::default()
        };
        let mut record = SessionRecord::new("abc");
        record.last_activity = Some(0);
        assert!(!record.is_expired(config.lifetime_secs(), crate::util::unix_now()));

        record.last_activity = Some(i64::MIN);
        assert!(!record.is_expired(config.lifetime_secs(), i64::MAX));
    }

    #[test]
    fn test_wire_layout_uses_flash_keys() {
        let mut record = SessionRecord::new("abc");
        record.data.values.insert("name".into(), json!("Robin"));
        record.data.new.insert("notice".into(), json!("saved"));
        record.last_activity = Some(42);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["data"]["name"], json!("Robin"));
        assert_eq!(value["data"][":new:"]["notice"], json!("saved"));
        assert_eq!(value["data"][":old:"], json!({}));

        let parsed: SessionRecord = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_missing_partitions_default_to_empty() {
        let parsed: SessionRecord =
            serde_json::from_str(r#"{"id":"x","data":{"user":7}}"#).unwrap();
        assert_eq!(parsed.data.values.get("user"), Some(&json!(7)));
        assert!(parsed.data.new.is_empty());
        assert!(parsed.data.old.is_empty());
    }

    #[test]
    fn test_reserved_keys() {
        assert!(is_reserved_key(":new:"));
        assert!(is_reserved_key(":old:"));
        assert!(!is_reserved_key("new"));
    }
}
