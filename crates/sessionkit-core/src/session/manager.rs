use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::error::{ConfigError, Result, SessionError};

use super::cache_store::CacheSessionStore;
use super::cookie::CookieJar;
use super::cookie_store::CookieSessionStore;
use super::memory_store::MemorySessionStore;
use super::payload::{sweep_expired, Payload, SaveReport};
use super::shared_cache::SharedMemoryCache;
use super::store::SessionStore;

/// Builds a store for a registered storage name.
pub type StoreResolver =
    Arc<dyn Fn(&SessionConfig) -> Result<Arc<dyn SessionStore>> + Send + Sync>;

/// Storage names understood without registration.
pub const BUILTIN_STORAGES: &[&str] = &[
    "memory", "cookie", "file", "database", "shared", "redis", "memcached",
];

/// Session facade for one request.
///
/// Picks a store by name, owns the request's [`Payload`] between `load()`
/// and `save()`, and forwards the session operations to it.
pub struct SessionManager {
    config: Arc<SessionConfig>,
    cookies: Arc<dyn CookieJar>,
    resolvers: DashMap<String, StoreResolver>,
    store: Option<Arc<dyn SessionStore>>,
    payload: Option<Payload>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, cookies: Arc<dyn CookieJar>) -> Self {
        Self {
            config: Arc::new(config),
            cookies,
            resolvers: DashMap::new(),
            store: None,
            payload: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Register a storage name. Registered names shadow the built-ins.
    pub fn extend<F>(&self, name: impl Into<String>, resolver: F)
    where
        F: Fn(&SessionConfig) -> Result<Arc<dyn SessionStore>> + Send + Sync + 'static,
    {
        self.resolvers.insert(name.into(), Arc::new(resolver));
    }

    /// Build the store registered or built in under `name`.
    pub async fn factory(&self, name: &str) -> Result<Arc<dyn SessionStore>> {
        let resolver = self.resolvers.get(name).map(|r| r.value().clone());
        if let Some(resolver) = resolver {
            debug!("Resolving custom session storage {}", name);
            return resolver(self.config.as_ref());
        }

        let config = &self.config;
        let attempts = config.max_id_attempts;
        let store: Arc<dyn SessionStore> = match name {
            "memory" => Arc::new(MemorySessionStore::new()),
            "cookie" => Arc::new(CookieSessionStore::new(
                self.cookies.clone(),
                &config.cookie_secret,
            )),
            #[cfg(feature = "file-backend")]
            "file" => Arc::new(
                super::FileSessionStore::new(&config.storage_dir())?.with_id_attempts(attempts),
            ),
            #[cfg(feature = "database-backend")]
            "database" => {
                let store = super::DatabaseSessionStore::connect(&config.database_url())
                    .await?
                    .with_id_attempts(attempts);
                store.create_table().await?;
                Arc::new(store)
            }
            "shared" => Arc::new(
                CacheSessionStore::new(SharedMemoryCache::global(), config.cache_prefix.clone())
                    .with_id_attempts(attempts),
            ),
            #[cfg(feature = "redis-backend")]
            "redis" => {
                let cache = super::redis_cache::RedisCache::connect(&config.redis_url).await?;
                Arc::new(
                    CacheSessionStore::new(Arc::new(cache), config.cache_prefix.clone())
                        .with_id_attempts(attempts),
                )
            }
            #[cfg(feature = "memcached-backend")]
            "memcached" => {
                let cache =
                    super::memcached_cache::MemcachedCache::connect(&config.memcached_server)
                        .await?;
                Arc::new(
                    CacheSessionStore::new(Arc::new(cache), config.cache_prefix.clone())
                        .with_id_attempts(attempts),
                )
            }
            other => return Err(ConfigError::UnsupportedStorage(other.to_string()).into()),
        };
        Ok(store)
    }

    /// Select the store for this manager.
    pub async fn start(&mut self, name: &str) -> Result<()> {
        let store = self.factory(name).await?;
        info!("Session storage: {}", store.name());
        self.store = Some(store);
        Ok(())
    }

    /// Whether a store has been selected.
    pub fn started(&self) -> bool {
        self.store.is_some()
    }

    pub fn store(&self) -> Result<&Arc<dyn SessionStore>> {
        self.store.as_ref().ok_or_else(|| SessionError::NotStarted.into())
    }

    /// Load the request's session from the id cookie, starting the configured
    /// storage first if none was selected.
    pub async fn load(&mut self) -> Result<()> {
        if self.store.is_none() {
            let name = self.config.storage.clone();
            self.start(&name).await?;
        }
        let store = self.store()?.clone();
        let id = self.cookies.get(&self.config.cookie);
        let payload = Payload::load(
            store,
            self.config.clone(),
            self.cookies.clone(),
            id.as_deref(),
        )
        .await?;
        self.payload = Some(payload);
        Ok(())
    }

    pub fn payload(&self) -> Result<&Payload> {
        self.payload.as_ref().ok_or_else(|| SessionError::NotStarted.into())
    }

    pub fn payload_mut(&mut self) -> Result<&mut Payload> {
        self.payload.as_mut().ok_or_else(|| SessionError::NotStarted.into())
    }

    pub fn get(&self, key: &str) -> Result<Option<&Value>> {
        Ok(self.payload()?.get(key))
    }

    pub fn get_or(&self, key: &str, default: Value) -> Result<Value> {
        Ok(self.payload()?.get_or(key, default))
    }

    pub fn has(&self, key: &str) -> Result<bool> {
        Ok(self.payload()?.has(key))
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.payload_mut()?.put(key, value);
        Ok(())
    }

    pub fn flash(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.payload_mut()?.flash(key, value);
        Ok(())
    }

    pub fn keep<I, K>(&mut self, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        self.payload_mut()?.keep(keys);
        Ok(())
    }

    pub fn reflash(&mut self) -> Result<()> {
        self.payload_mut()?.reflash();
        Ok(())
    }

    pub fn forget(&mut self, key: &str) -> Result<()> {
        self.payload_mut()?.forget(key);
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.payload_mut()?.flush();
        Ok(())
    }

    pub async fn regenerate(&mut self) -> Result<()> {
        self.payload_mut()?.regenerate().await
    }

    pub fn token(&self) -> Result<Option<&str>> {
        Ok(self.payload()?.token())
    }

    pub fn activity(&self) -> Result<Option<i64>> {
        Ok(self.payload()?.activity())
    }

    /// Persist the session and end the request.
    ///
    /// The payload is released on success. On failure it stays loaded so the
    /// rest of the request still sees it.
    pub async fn save(&mut self) -> Result<SaveReport> {
        let mut payload = self.payload.take().ok_or(SessionError::NotStarted)?;
        match payload.save().await {
            Ok(report) => Ok(report),
            Err(e) => {
                self.payload = Some(payload);
                Err(e)
            }
        }
    }

    /// Sweep expired sessions from the selected store.
    pub async fn clean(&self) -> Result<Option<u64>> {
        sweep_expired(self.store()?.as_ref(), &self.config).await
    }
}
