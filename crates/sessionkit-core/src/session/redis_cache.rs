use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use crate::error::Result;

use super::cache_store::{is_stale, KeyValueCache};

/// Keys examined per SCAN round trip.
const SCAN_BATCH_SIZE: usize = 100;

/// Redis-backed [`KeyValueCache`].
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        debug!("redis: connected to {}", url);
        Ok(Self { conn })
    }
}

#[async_trait]
impl KeyValueCache for RedisCache {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    /// Redis expires keys by TTL, but a lifetime shortened after the fact
    /// leaves long-TTL records behind; those are found by SCAN.
    async fn sweep(&self, prefix: &str, threshold: i64) -> Result<u64> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut removed = 0;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH_SIZE)
                .query_async(&mut conn)
                .await?;

            for key in keys {
                let raw: Option<String> = conn.get(&key).await?;
                if raw.is_some_and(|raw| is_stale(&raw, threshold)) {
                    let deleted: u64 = conn.del(&key).await?;
                    removed += deleted;
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(removed)
    }
}
