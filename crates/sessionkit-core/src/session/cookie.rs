//! Boundary to whatever writes cookies onto the response.
//!
//! The session layer never touches transport: it reads incoming cookies and
//! queues outgoing ones through a [`CookieJar`].

use dashmap::DashMap;

use crate::config::SessionConfig;

/// Minutes used to expire a cookie immediately.
const FORGET_MINUTES: i64 = -2000;

/// A cookie queued for the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Lifetime in minutes; 0 is a session-only cookie, negative expires it.
    pub minutes: i64,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
}

impl Cookie {
    /// A cookie scoped by the session's path/domain/secure policy.
    pub fn scoped(
        name: impl Into<String>,
        value: impl Into<String>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            minutes: config.cookie_minutes() as i64,
            path: config.path.clone(),
            domain: config.domain.clone(),
            secure: config.secure,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.minutes < 0
    }
}

/// Cookie-delivery collaborator.
pub trait CookieJar: Send + Sync {
    /// Value of a cookie as the current request sees it.
    fn get(&self, name: &str) -> Option<String>;

    /// Queue a cookie for the response.
    fn put(&self, cookie: Cookie);

    /// Queue an already-expired cookie so the client drops it.
    fn forget(&self, name: &str);
}

/// In-process jar: request cookies in, queued response cookies out.
#[derive(Default)]
pub struct MemoryCookieJar {
    incoming: DashMap<String, String>,
    queued: DashMap<String, Cookie>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jar seeded with the cookies a request arrived with.
    pub fn with_request_cookies<I, K, V>(cookies: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let jar = Self::new();
        for (name, value) in cookies {
            jar.incoming.insert(name.into(), value.into());
        }
        jar
    }

    /// The cookie queued under `name`, if any.
    pub fn queued(&self, name: &str) -> Option<Cookie> {
        self.queued.get(name).map(|c| c.value().clone())
    }

    /// Every queued cookie (response headers to emit).
    pub fn queued_cookies(&self) -> Vec<Cookie> {
        self.queued.iter().map(|c| c.value().clone()).collect()
    }

    /// Turn queued cookies into the next request's incoming cookies.
    ///
    /// Mimics a browser round trip: live cookies are sent back, expired ones
    /// are dropped.
    pub fn roll_over(&self) {
        let queued: Vec<Cookie> = self.queued.iter().map(|c| c.value().clone()).collect();
        self.queued.clear();
        for cookie in queued {
            if cookie.is_expired() {
                self.incoming.remove(&cookie.name);
            } else {
                self.incoming.insert(cookie.name, cookie.value);
            }
        }
    }
}

impl CookieJar for MemoryCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        if let Some(cookie) = self.queued.get(name) {
            if cookie.is_expired() {
                return None;
            }
            return Some(cookie.value.clone());
        }
        self.incoming.get(name).map(|v| v.value().clone())
    }

    fn put(&self, cookie: Cookie) {
        self.queued.insert(cookie.name.clone(), cookie);
    }

    fn forget(&self, name: &str) {
        self.queued.insert(
            name.to_string(),
            Cookie {
                name: name.to_string(),
                value: String::new(),
                minutes: FORGET_MINUTES,
                path: "/".to_string(),
                domain: None,
                secure: false,
            },
        );
    }
}
