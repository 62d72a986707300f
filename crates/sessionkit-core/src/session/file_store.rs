use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{Result, StorageError};
use crate::util::{ensure_dir, random_string, safe_filename};

use super::id::DEFAULT_MAX_ATTEMPTS;
use super::store::{Cleaner, SessionStore};
use super::SessionRecord;

/// File-based session store: one JSON file per session id.
pub struct FileSessionStore {
    sessions_dir: PathBuf,
    id_attempts: usize,
}

impl FileSessionStore {
    pub fn new(sessions_dir: &Path) -> Result<Self> {
        let sessions_dir = ensure_dir(sessions_dir)?;
        Ok(Self {
            sessions_dir,
            id_attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }

    pub fn with_id_attempts(mut self, attempts: usize) -> Self {
        self.id_attempts = attempts;
        self
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    /// Path for `key`, or `None` when the key could escape the directory.
    fn session_path(&self, key: &str) -> Option<PathBuf> {
        if key.is_empty() || key.starts_with('.') || safe_filename(key) != key {
            return None;
        }
        Some(self.sessions_dir.join(key))
    }

    /// Read the record at `path`. A missing file or unparseable content is
    /// `Ok(None)`; any other I/O failure is an error.
    async fn read_record(path: &Path) -> Result<Option<SessionRecord>> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e).into()),
        };
        match serde_json::from_str(&content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Ignoring unreadable session file {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, key: &str) -> Result<Option<SessionRecord>> {
        let Some(path) = self.session_path(key) else {
            return Ok(None);
        };
        Self::read_record(&path).await
    }

    async fn save(
        &self,
        session: &SessionRecord,
        _config: &SessionConfig,
        _exists: bool,
    ) -> Result<()> {
        let Some(path) = self.session_path(&session.id) else {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unsafe session id: {}", session.id),
            ))
            .into());
        };

        let content = serde_json::to_vec(session).map_err(StorageError::from)?;
        // Write-then-rename so readers never see a half-written file.
        let tmp = self
            .sessions_dir
            .join(format!(".{}.{}.tmp", session.id, random_string(8)));
        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!("file: saved {}", path.display());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let Some(path) = self.session_path(key) else {
            return Ok(());
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn id_attempts(&self) -> usize {
        self.id_attempts
    }

    fn cleaner(&self) -> Option<&dyn Cleaner> {
        Some(self)
    }
}

#[async_trait]
impl Cleaner for FileSessionStore {
    async fn clean(&self, threshold: i64) -> Result<u64> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.sessions_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            let Some(record) = Self::read_record(&path).await? else {
                continue;
            };
            if record.last_activity.is_some_and(|last| last < threshold) {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    // Another worker got there first.
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        if removed > 0 {
            info!("file: swept {} stale sessions", removed);
        }
        Ok(removed)
    }
}
