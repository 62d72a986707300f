//! Per-request session state: flash generations, CSRF token, expiry and the
//! garbage-collection lottery.

use std::sync::Arc;

use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::Result;
use crate::util::unix_now;

use super::cookie::{Cookie, CookieJar};
use super::id::random_id;
use super::store::SessionStore;
use super::{is_reserved_key, SessionRecord, CSRF_TOKEN};

/// Outcome of [`Payload::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    /// Id the session was saved under (and handed to the cookie jar).
    pub id: String,
    /// Records removed by the sweep, or `None` when no sweep ran.
    pub swept: Option<u64>,
}

/// The session of the current request.
pub struct Payload {
    session: SessionRecord,
    exists: bool,
    store: Arc<dyn SessionStore>,
    config: Arc<SessionConfig>,
    cookies: Arc<dyn CookieJar>,
}

impl Payload {
    /// Load the session for `id`, or start a fresh one.
    ///
    /// A missing, unknown or expired id yields a fresh record under a new id
    /// with `exists() == false`. Either way the CSRF token is present
    /// afterwards.
    pub async fn load(
        store: Arc<dyn SessionStore>,
        config: Arc<SessionConfig>,
        cookies: Arc<dyn CookieJar>,
        id: Option<&str>,
    ) -> Result<Self> {
        let loaded = match id.filter(|id| !id.is_empty()) {
            Some(id) => store.load(id).await?,
            None => None,
        };

        let now = unix_now();
        let (session, exists) = match loaded {
            Some(record) if !record.is_expired(config.lifetime_secs(), now) => (record, true),
            Some(record) => {
                debug!("{}: session {} expired", store.name(), record.id);
                (store.fresh().await?, false)
            }
            None => (store.fresh().await?, false),
        };

        let mut payload = Self {
            session,
            exists,
            store,
            config,
            cookies,
        };
        if !payload.session.data.values.contains_key(CSRF_TOKEN) {
            payload
                .session
                .data
                .values
                .insert(CSRF_TOKEN.to_string(), Value::String(random_id()));
        }
        Ok(payload)
    }

    pub fn id(&self) -> &str {
        &self.session.id
    }

    /// Whether the record was loaded from storage (false once regenerated).
    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn record(&self) -> &SessionRecord {
        &self.session
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Look `key` up in the persistent values, then this request's flash
    /// data, then the previous request's. `null` counts as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let data = &self.session.data;
        [&data.values, &data.new, &data.old]
            .into_iter()
            .filter_map(|partition| partition.get(key))
            .find(|v| !v.is_null())
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).cloned().unwrap_or(default)
    }

    /// Store a persistent value.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if is_reserved_key(&key) {
            warn!("Ignoring write to reserved session key {}", key);
            return;
        }
        self.session.data.values.insert(key, value.into());
    }

    /// Store a value for this request and the next one only.
    pub fn flash(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.session.data.new.insert(key.into(), value.into());
    }

    /// Keep the given keys around for one more request.
    pub fn keep<I, K>(&mut self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        for key in keys {
            let key = key.as_ref();
            if let Some(value) = self.get(key).cloned() {
                self.flash(key, value);
            }
        }
    }

    /// Keep all of the previous request's flash data for one more request.
    ///
    /// On a key present in both generations the previous request's value
    /// replaces this request's.
    pub fn reflash(&mut self) {
        let data = &mut self.session.data;
        for (key, value) in data.old.drain() {
            data.new.insert(key, value);
        }
    }

    /// Remove a persistent value. Flash data is untouched.
    pub fn forget(&mut self, key: &str) {
        self.session.data.values.remove(key);
    }

    /// Drop everything except the CSRF token.
    pub fn flush(&mut self) {
        let data = &mut self.session.data;
        data.values.retain(|key, _| key == CSRF_TOKEN);
        data.new.clear();
        data.old.clear();
    }

    /// Move the session to a new id. Data stays; the next save inserts.
    pub async fn regenerate(&mut self) -> Result<()> {
        let id = self.store.new_id().await?;
        debug!("{}: regenerated {} -> {}", self.store.name(), self.session.id, id);
        self.session.id = id;
        self.exists = false;
        Ok(())
    }

    /// The session's CSRF token.
    pub fn token(&self) -> Option<&str> {
        self.get(CSRF_TOKEN).and_then(Value::as_str)
    }

    /// Unix time of the last save, if the session was ever saved.
    pub fn activity(&self) -> Option<i64> {
        self.session.last_activity
    }

    /// Rotate flash generations: this request's flash data becomes the
    /// previous request's.
    fn age(&mut self) {
        let data = &mut self.session.data;
        data.old = std::mem::take(&mut data.new);
    }

    /// Persist the session, queue the id cookie and maybe sweep.
    ///
    /// Aging happens before the store is called and is not undone if the
    /// store fails.
    pub async fn save(&mut self) -> Result<SaveReport> {
        self.session.last_activity = Some(unix_now());
        self.age();

        self.store
            .save(&self.session, &self.config, self.exists)
            .await?;
        self.exists = true;

        self.cookies.put(Cookie::scoped(
            self.config.cookie.clone(),
            self.session.id.clone(),
            &self.config,
        ));

        let won = gc_lottery(self.config.garbage_collection, &mut rand::thread_rng());
        let swept = if won { self.clean().await? } else { None };

        Ok(SaveReport {
            id: self.session.id.clone(),
            swept,
        })
    }

    /// Sweep expired sessions now. `None` when the store has no cleaner.
    pub async fn clean(&self) -> Result<Option<u64>> {
        sweep_expired(self.store.as_ref(), &self.config).await
    }
}

/// Draw the garbage-collection lottery for `[numerator, denominator]` odds.
pub fn gc_lottery<R: Rng + ?Sized>(odds: [u32; 2], rng: &mut R) -> bool {
    let [numerator, denominator] = odds;
    if denominator == 0 {
        return false;
    }
    rng.gen_range(1..=denominator) <= numerator
}

/// Delete every session in `store` idle longer than the configured lifetime.
pub async fn sweep_expired<S: SessionStore + ?Sized>(
    store: &S,
    config: &SessionConfig,
) -> Result<Option<u64>> {
    let Some(cleaner) = store.cleaner() else {
        debug!("{}: no cleaner, skipping sweep", store.name());
        return Ok(None);
    };
    let threshold = unix_now().saturating_sub(config.lifetime_secs());
    Ok(Some(cleaner.clean(threshold).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{
        CacheSessionStore, MemoryCookieJar, MemorySessionStore, SharedMemoryCache,
    };
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    struct Fixture {
        store: Arc<MemorySessionStore>,
        config: Arc<SessionConfig>,
        jar: Arc<MemoryCookieJar>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(SessionConfig {
                garbage_collection: [0, 100],
                ..Default::default()
            })
        }

        fn with_config(config: SessionConfig) -> Self {
            Self {
                store: Arc::new(MemorySessionStore::new()),
                config: Arc::new(config),
                jar: Arc::new(MemoryCookieJar::new()),
            }
        }

        async fn load(&self, id: Option<&str>) -> Payload {
            Payload::load(self.store.clone(), self.config.clone(), self.jar.clone(), id)
                .await
                .unwrap()
        }

        /// Save `payload`, then load the next request's payload from its cookie.
        async fn next(&self, mut payload: Payload) -> Payload {
            let report = payload.save().await.unwrap();
            self.jar.roll_over();
            let id = self.jar.get(&self.config.cookie);
            assert_eq!(id.as_deref(), Some(report.id.as_str()));
            self.load(id.as_deref()).await
        }
    }

    #[tokio::test]
    async fn test_fresh_load_has_token() {
        let fx = Fixture::new();
        let payload = fx.load(None).await;
        assert!(!payload.exists());
        assert_eq!(payload.id().len(), 40);
        assert_eq!(payload.token().unwrap().len(), 40);
        assert!(payload.has(CSRF_TOKEN));
    }

    #[tokio::test]
    async fn test_unknown_id_starts_fresh() {
        let fx = Fixture::new();
        let payload = fx.load(Some("nope")).await;
        assert!(!payload.exists());
        assert_ne!(payload.id(), "nope");
    }

    #[tokio::test]
    async fn test_flash_visibility_window() {
        let fx = Fixture::new();
        let mut first = fx.load(None).await;
        first.flash("notice", "saved");
        assert_eq!(first.get("notice"), Some(&json!("saved")));

        let second = fx.next(first).await;
        assert!(second.exists());
        assert_eq!(second.get("notice"), Some(&json!("saved")));

        let third = fx.next(second).await;
        assert!(third.get("notice").is_none());
    }

    #[tokio::test]
    async fn test_keep_and_reflash_extend_flash() {
        let fx = Fixture::new();
        let mut p = fx.load(None).await;
        p.flash("a", 1);
        p.flash("b", 2);

        let mut p = fx.next(p).await;
        p.keep(["a", "missing"]);
        let p = fx.next(p).await;
        assert_eq!(p.get("a"), Some(&json!(1)));
        assert!(p.get("b").is_none());
        assert!(p.get("missing").is_none());

        let mut p = p;
        p.flash("c", 3);
        p.reflash();
        let p = fx.next(p).await;
        assert_eq!(p.get("a"), Some(&json!(1)));
        assert_eq!(p.get("c"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_reflash_prefers_previous_generation() {
        let fx = Fixture::new();
        let mut p = fx.load(None).await;
        p.flash("k", "from_old");

        let mut p = fx.next(p).await;
        p.flash("k", "from_new");
        p.reflash();
        assert_eq!(p.record().data.new.get("k"), Some(&json!("from_old")));
        assert!(p.record().data.old.is_empty());

        let p = fx.next(p).await;
        assert_eq!(p.get("k"), Some(&json!("from_old")));
    }

    #[tokio::test]
    async fn test_persistence_and_forget() {
        let fx = Fixture::new();
        let mut p = fx.load(None).await;
        p.put("user", 42);
        for _ in 0..5 {
            p = fx.next(p).await;
            assert_eq!(p.get("user"), Some(&json!(42)));
        }
        p.flash("user_flash", 1);
        p.forget("user");
        p.forget("user_flash");
        assert!(!p.has("user"));
        assert!(p.has("user_flash"));
    }

    #[tokio::test]
    async fn test_precedence_and_null() {
        let fx = Fixture::new();
        let mut p = fx.load(None).await;
        p.flash("k", "flash");
        assert_eq!(p.get("k"), Some(&json!("flash")));
        p.put("k", "persistent");
        assert_eq!(p.get("k"), Some(&json!("persistent")));

        p.put("k", Value::Null);
        assert_eq!(p.get("k"), Some(&json!("flash")));
        p.put("nothing", Value::Null);
        assert!(!p.has("nothing"));
        assert_eq!(p.get_or("nothing", json!("fallback")), json!("fallback"));
    }

    #[tokio::test]
    async fn test_reserved_keys_are_not_writable() {
        let fx = Fixture::new();
        let mut p = fx.load(None).await;
        p.put(":new:", "boom");
        assert!(!p.record().data.values.contains_key(":new:"));
    }

    #[tokio::test]
    async fn test_flush_keeps_only_token() {
        let fx = Fixture::new();
        let mut p = fx.load(None).await;
        let token = p.token().unwrap().to_string();
        p.put("a", 1);
        p.flash("b", 2);
        p.flush();
        assert_eq!(p.record().data.values.len(), 1);
        assert!(p.record().data.new.is_empty());
        assert_eq!(p.token(), Some(token.as_str()));
    }

    #[tokio::test]
    async fn test_csrf_token_stable_across_loads() {
        let fx = Fixture::new();
        let p = fx.load(None).await;
        let token = p.token().unwrap().to_string();
        let p = fx.next(p).await;
        assert_eq!(p.token(), Some(token.as_str()));
        let p = fx.next(p).await;
        assert_eq!(p.token(), Some(token.as_str()));
    }

    #[tokio::test]
    async fn test_expired_session_is_replaced() {
        let fx = Fixture::with_config(SessionConfig {
            lifetime: 10,
            garbage_collection: [0, 100],
            ..Default::default()
        });
        let mut record = SessionRecord::new("stale-session");
        record.data.values.insert("user".into(), json!(1));
        record.data.values.insert(CSRF_TOKEN.into(), json!("old-token"));
        record.last_activity = Some(unix_now() - 11 * 60);
        fx.store.save(&record, &fx.config, false).await.unwrap();

        let p = fx.load(Some("stale-session")).await;
        assert!(!p.exists());
        assert_ne!(p.id(), "stale-session");
        assert!(p.get("user").is_none());
        assert_ne!(p.token(), Some("old-token"));
    }

    #[tokio::test]
    async fn test_regenerate_keeps_data_and_flash() {
        let fx = Fixture::new();
        let p = fx.load(None).await;
        let mut p = fx.next(p).await;
        let old_id = p.id().to_string();
        p.put("user", 7);
        p.flash("notice", "hi");

        p.regenerate().await.unwrap();
        assert!(!p.exists());
        assert_ne!(p.id(), old_id);

        let p = fx.next(p).await;
        assert_ne!(p.id(), old_id);
        assert_eq!(p.get("user"), Some(&json!(7)));
        assert_eq!(p.get("notice"), Some(&json!("hi")));

        let previous = fx.store.load(&old_id).await.unwrap();
        assert!(previous.is_some());
        fx.store.delete(&old_id).await.unwrap();
        assert!(fx.store.load(&old_id).await.unwrap().is_none());
        assert!(fx.store.load(p.id()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_save_queues_scoped_cookie() {
        let fx = Fixture::with_config(SessionConfig {
            cookie: "sid".into(),
            lifetime: 30,
            path: "/app".into(),
            domain: Some("example.com".into()),
            secure: true,
            garbage_collection: [0, 100],
            ..Default::default()
        });
        let mut p = fx.load(None).await;
        let report = p.save().await.unwrap();
        assert!(p.activity().is_some());

        let cookie = fx.jar.queued("sid").unwrap();
        assert_eq!(cookie.value, report.id);
        assert_eq!(cookie.minutes, 30);
        assert_eq!(cookie.path, "/app");
        assert_eq!(cookie.domain.as_deref(), Some("example.com"));
        assert!(cookie.secure);
    }

    #[tokio::test]
    async fn test_expire_on_close_cookie_has_no_lifetime() {
        let fx = Fixture::with_config(SessionConfig {
            expire_on_close: true,
            garbage_collection: [0, 100],
            ..Default::default()
        });
        let mut p = fx.load(None).await;
        p.save().await.unwrap();
        assert_eq!(fx.jar.queued("session_id").unwrap().minutes, 0);
    }

    #[tokio::test]
    async fn test_save_twice_in_one_request() {
        let fx = Fixture::new();
        let mut p = fx.load(None).await;
        p.save().await.unwrap();
        assert!(p.exists());
        p.put("later", true);
        p.save().await.unwrap();
        let stored = fx.store.load(p.id()).await.unwrap().unwrap();
        assert_eq!(stored.data.values["later"], json!(true));
    }

    #[tokio::test]
    async fn test_lottery_sweeps_cleaner_stores() {
        let config = Arc::new(SessionConfig {
            lifetime: 1,
            garbage_collection: [1, 1],
            ..Default::default()
        });
        let store = Arc::new(CacheSessionStore::new(Arc::new(SharedMemoryCache::new()), "s:"));
        let mut stale = SessionRecord::new("stale");
        stale.last_activity = Some(unix_now() - 3600);
        store.save(&stale, &config, false).await.unwrap();

        let mut p = Payload::load(store.clone(), config, Arc::new(MemoryCookieJar::new()), None)
            .await
            .unwrap();
        let report = p.save().await.unwrap();
        assert_eq!(report.swept, Some(1));
        assert!(store.load("stale").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lottery_skips_stores_without_cleaner() {
        let fx = Fixture::with_config(SessionConfig {
            garbage_collection: [1, 1],
            ..Default::default()
        });
        let mut p = fx.load(None).await;
        assert_eq!(p.save().await.unwrap().swept, None);
    }

    #[test]
    fn test_gc_lottery_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!((0..1000).all(|_| gc_lottery([1, 1], &mut rng)));
        assert!((0..1000).all(|_| !gc_lottery([0, 1], &mut rng)));
        assert!(!gc_lottery([1, 0], &mut rng));
    }

    #[test]
    fn test_gc_lottery_frequency() {
        let mut rng = StdRng::seed_from_u64(42);
        let draws = 200_000;
        let hits = (0..draws).filter(|_| gc_lottery([1, 100], &mut rng)).count();
        let rate = hits as f64 / draws as f64;
        assert!((rate - 0.01).abs() < 0.002, "rate was {}", rate);
    }
}
