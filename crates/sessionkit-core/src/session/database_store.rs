//! Relational session storage over a sqlx SQLite pool.
//!
//! Schema:
//!
//! ```sql
//! CREATE TABLE sessions (
//!     id TEXT PRIMARY KEY NOT NULL,
//!     last_activity INTEGER NOT NULL,
//!     data TEXT NOT NULL
//! );
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{ConfigError, Result, StorageError};
use crate::util::unix_now;

use super::id::DEFAULT_MAX_ATTEMPTS;
use super::store::{Cleaner, SessionStore};
use super::{SessionData, SessionRecord};

pub const DEFAULT_TABLE: &str = "sessions";

/// Database-backed session store.
pub struct DatabaseSessionStore {
    pool: SqlitePool,
    table: String,
    id_attempts: usize,
}

impl DatabaseSessionStore {
    /// Connect to `url` (e.g. `sqlite://sessions.db?mode=rwc`).
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool shared with the rest of the application.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            table: DEFAULT_TABLE.to_string(),
            id_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Use another table name. Only `[A-Za-z0-9_]` is accepted.
    pub fn with_table(mut self, table: &str) -> Result<Self> {
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            let reason = format!("invalid session table name: {}", table);
            return Err(ConfigError::Invalid(reason).into());
        }
        self.table = table.to_string();
        Ok(self)
    }

    pub fn with_id_attempts(mut self, attempts: usize) -> Self {
        self.id_attempts = attempts;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the session table and its activity index if missing.
    pub async fn create_table(&self) -> Result<()> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {t} (
                id TEXT PRIMARY KEY NOT NULL,
                last_activity INTEGER NOT NULL,
                data TEXT NOT NULL
            )",
            t = self.table
        ))
        .execute(&self.pool)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {t}_last_activity ON {t} (last_activity)",
            t = self.table
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert(&self, id: &str, last_activity: i64, data: &str) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (id, last_activity, data) VALUES (?, ?, ?)",
            self.table
        ))
        .bind(id)
        .bind(last_activity)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for DatabaseSessionStore {
    fn name(&self) -> &str {
        "database"
    }

    async fn load(&self, key: &str) -> Result<Option<SessionRecord>> {
        let row: Option<(String, i64, String)> = sqlx::query_as(&format!(
            "SELECT id, last_activity, data FROM {} WHERE id = ?",
            self.table
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, last_activity, data)) = row else {
            return Ok(None);
        };
        let data: SessionData = match serde_json::from_str(&data) {
            Ok(data) => data,
            Err(e) => {
                warn!("database: ignoring unreadable session {}: {}", id, e);
                return Ok(None);
            }
        };
        Ok(Some(SessionRecord {
            id,
            data,
            last_activity: Some(last_activity),
        }))
    }

    async fn save(
        &self,
        session: &SessionRecord,
        _config: &SessionConfig,
        exists: bool,
    ) -> Result<()> {
        let data = serde_json::to_string(&session.data).map_err(StorageError::from)?;
        let last_activity = session.last_activity.unwrap_or_else(unix_now);

        if !exists {
            debug!("database: insert {}", session.id);
            return self.insert(&session.id, last_activity, &data).await;
        }

        let updated = sqlx::query(&format!(
            "UPDATE {} SET last_activity = ?, data = ? WHERE id = ?",
            self.table
        ))
        .bind(last_activity)
        .bind(&data)
        .bind(&session.id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            // Swept by another worker between load and save.
            debug!("database: {} vanished, re-inserting", session.id);
            self.insert(&session.id, last_activity, &data).await?;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query(&format!("DELETE FROM {} WHERE id = ?", self.table))
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn id_attempts(&self) -> usize {
        self.id_attempts
    }

    fn cleaner(&self) -> Option<&dyn Cleaner> {
        Some(self)
    }
}

#[async_trait]
impl Cleaner for DatabaseSessionStore {
    async fn clean(&self, threshold: i64) -> Result<u64> {
        let removed = sqlx::query(&format!(
            "DELETE FROM {} WHERE last_activity < ?",
            self.table
        ))
        .bind(threshold)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if removed > 0 {
            info!("database: swept {} stale sessions", removed);
        }
        Ok(removed)
    }
}
