use async_trait::async_trait;
use memcache_async::ascii::Protocol;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::debug;

use crate::error::{Result, StorageError};

use super::cache_store::KeyValueCache;

type MemcachedProtocol = Protocol<Compat<TcpStream>>;

/// Longest expiry memcached reads as relative; larger values are Unix times.
const MAX_RELATIVE_TTL: u64 = 60 * 60 * 24 * 30;

fn expiration(ttl_secs: u64) -> u32 {
    let ttl = if ttl_secs > MAX_RELATIVE_TTL {
        (crate::util::unix_now().max(0) as u64).saturating_add(ttl_secs)
    } else {
        ttl_secs
    };
    u32::try_from(ttl).unwrap_or(u32::MAX)
}

/// Memcached-backed [`KeyValueCache`] over a single server connection.
///
/// Memcached evicts by TTL and cannot enumerate keys, so the default no-op
/// sweep applies.
pub struct MemcachedCache {
    protocol: Mutex<MemcachedProtocol>,
}

impl MemcachedCache {
    /// Connect to `addr` (e.g. `127.0.0.1:11211`).
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| StorageError::Memcached(format!("connect {}: {}", addr, e)))?;
        debug!("memcached: connected to {}", addr);
        Ok(Self {
            protocol: Mutex::new(Protocol::new(stream.compat())),
        })
    }
}

#[async_trait]
impl KeyValueCache for MemcachedCache {
    fn name(&self) -> &str {
        "memcached"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut protocol = self.protocol.lock().await;
        match protocol.get(&key).await {
            // Forgotten keys are overwritten with an empty value.
            Ok(value) if value.is_empty() => Ok(None),
            Ok(value) => String::from_utf8(value)
                .map(Some)
                .map_err(|e| {
                    let reason = format!("non-UTF-8 value under {}: {}", key, e);
                    StorageError::Memcached(reason).into()
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Memcached(format!("get {}: {}", key, e)).into()),
        }
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let ttl = expiration(ttl_secs);
        let mut protocol = self.protocol.lock().await;
        protocol
            .set(&key, value.as_bytes(), ttl)
            .await
            .map_err(|e| StorageError::Memcached(format!("set {}: {}", key, e)))?;
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<()> {
        let mut protocol = self.protocol.lock().await;
        protocol
            .set(&key, &[], 1)
            .await
            .map_err(|e| StorageError::Memcached(format!("delete {}: {}", key, e)))?;
        Ok(())
    }
}
