pub mod provider;
pub mod repository;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub use repository::Repository;

/// Root configuration for sessionkit.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
}

/// Session policy and backend connection settings.
///
/// Key names follow the `[session]` table of the application config file,
/// so they stay snake_case on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Backend name: memory, cookie, file, database, shared, redis, memcached
    /// or anything registered through `SessionManager::extend`.
    pub storage: String,
    /// Name of the cookie carrying the session id.
    pub cookie: String,
    /// Minutes of inactivity before a session is treated as expired.
    pub lifetime: u64,
    /// Deliver a session-only cookie instead of one that lives `lifetime` minutes.
    pub expire_on_close: bool,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    /// `[numerator, denominator]` odds of sweeping stale sessions on save.
    pub garbage_collection: [u32; 2],
    /// Directory used by the file store.
    pub storage_path: Option<String>,
    /// Connection URL used by the database store.
    pub database: Option<String>,
    pub redis_url: String,
    pub memcached_server: String,
    /// Key prefix used by the cache-backed stores.
    pub cache_prefix: String,
    /// HMAC key for payloads held by the cookie store.
    pub cookie_secret: String,
    /// Upper bound on collisions tolerated while generating a session id.
    pub max_id_attempts: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage: "memory".to_string(),
            cookie: "session_id".to_string(),
            lifetime: 60,
            expire_on_close: false,
            path: "/".to_string(),
            domain: None,
            secure: false,
            garbage_collection: [2, 100],
            storage_path: None,
            database: None,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            memcached_server: "127.0.0.1:11211".to_string(),
            cache_prefix: "session:".to_string(),
            cookie_secret: String::new(),
            max_id_attempts: 16,
        }
    }
}

impl SessionConfig {
    /// Lifetime in seconds, saturating at `i64::MAX`.
    pub fn lifetime_secs(&self) -> i64 {
        i64::try_from(self.lifetime)
            .unwrap_or(i64::MAX)
            .saturating_mul(60)
    }

    /// Minutes handed to the cookie collaborator (0 means session-only).
    pub fn cookie_minutes(&self) -> u64 {
        if self.expire_on_close {
            0
        } else {
            self.lifetime
        }
    }

    /// Resolved directory for the file store.
    pub fn storage_dir(&self) -> PathBuf {
        match &self.storage_path {
            Some(p) => expand_home(p),
            None => get_data_dir().join("sessions"),
        }
    }

    /// Resolved connection URL for the database store.
    pub fn database_url(&self) -> String {
        self.database.clone().unwrap_or_else(|| {
            format!(
                "sqlite://{}?mode=rwc",
                get_data_dir().join("sessions.db").display()
            )
        })
    }
}

fn expand_home(path: &str) -> PathBuf {
    if path.starts_with("~/") || path.starts_with("~\\") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&path[2..]);
        }
    }
    PathBuf::from(path)
}

/// Load configuration from environment variables.
///
/// Priority:
/// 1. `SESSIONKIT_CONFIG` env var — full JSON config
/// 2. Individual `SESSION_*` env vars (merged on top of the file config)
/// 3. File fallback (`~/.sessionkit/config.json`)
pub fn load_config_from_env() -> Config {
    if let Ok(json) = std::env::var("SESSIONKIT_CONFIG") {
        match serde_json::from_str::<Config>(&json) {
            Ok(config) => return config,
            Err(e) => {
                tracing::warn!("Failed to parse SESSIONKIT_CONFIG: {}", e);
            }
        }
    }

    let mut cfg = load_config(None);
    let session = &mut cfg.session;

    if let Ok(v) = std::env::var("SESSION_STORAGE") {
        session.storage = v;
    }
    if let Ok(v) = std::env::var("SESSION_COOKIE") {
        session.cookie = v;
    }
    if let Ok(v) = std::env::var("SESSION_LIFETIME") {
        match v.parse() {
            Ok(minutes) => session.lifetime = minutes,
            Err(_) => tracing::warn!("Ignoring non-numeric SESSION_LIFETIME: {}", v),
        }
    }
    if let Ok(v) = std::env::var("SESSION_EXPIRE_ON_CLOSE") {
        session.expire_on_close = parse_flag(&v);
    }
    if let Ok(v) = std::env::var("SESSION_SECURE") {
        session.secure = parse_flag(&v);
    }
    if let Ok(v) = std::env::var("SESSION_DOMAIN") {
        session.domain = Some(v).filter(|d| !d.is_empty());
    }
    if let Ok(v) = std::env::var("SESSION_STORAGE_PATH") {
        session.storage_path = Some(v);
    }
    if let Ok(v) = std::env::var("SESSION_DATABASE_URL") {
        session.database = Some(v);
    }
    if let Ok(v) = std::env::var("SESSION_REDIS_URL") {
        session.redis_url = v;
    }
    if let Ok(v) = std::env::var("SESSION_MEMCACHED_SERVER") {
        session.memcached_server = v;
    }
    if let Ok(v) = std::env::var("SESSION_COOKIE_SECRET") {
        session.cookie_secret = v;
    }

    cfg
}

fn parse_flag(v: &str) -> bool {
    matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Get the default configuration file path.
pub fn get_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sessionkit")
        .join("config.json")
}

/// Get the sessionkit data directory.
pub fn get_data_dir() -> PathBuf {
    let path = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sessionkit");
    std::fs::create_dir_all(&path).ok();
    path
}

/// Load configuration from file or create default.
pub fn load_config(config_path: Option<&Path>) -> Config {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(get_config_path);

    if path.exists() {
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Config>(&content) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to parse config from {}: {}", path.display(), e);
                    tracing::warn!("Using default configuration.");
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config from {}: {}", path.display(), e);
                tracing::warn!("Using default configuration.");
            }
        }
    }

    Config::default()
}

/// Save configuration to file.
pub fn save_config(
    config: &Config,
    config_path: Option<&Path>,
) -> std::result::Result<(), ConfigError> {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(get_config_path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    }

    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    Ok(())
}
