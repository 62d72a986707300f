use std::path::PathBuf;

/// Core error types for sessionkit.
#[derive(Debug, thiserror::Error)]
pub enum SessionkitError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Session storage [{0}] is not supported")]
    UnsupportedStorage(String),

    #[error("Config objects are immutable (attempted to change '{0}')")]
    Immutable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("A storage must be set before using the session")]
    NotStarted,

    #[error("Could not generate a unique session id after {attempts} attempts")]
    GenerationExhausted { attempts: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize session: {0}")]
    Serialize(#[from] serde_json::Error),

    #[cfg(feature = "database-backend")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "redis-backend")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Memcached error: {0}")]
    Memcached(String),

    #[error("Cookie payload error: {0}")]
    Cookie(String),
}

pub type Result<T> = std::result::Result<T, SessionkitError>;

#[cfg(feature = "database-backend")]
impl From<sqlx::Error> for SessionkitError {
    fn from(e: sqlx::Error) -> Self {
        SessionkitError::Storage(StorageError::Database(e))
    }
}

#[cfg(feature = "redis-backend")]
impl From<redis::RedisError> for SessionkitError {
    fn from(e: redis::RedisError) -> Self {
        SessionkitError::Storage(StorageError::Redis(e))
    }
}
