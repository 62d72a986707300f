use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::config::SessionConfig;
use crate::error::Result;

use super::store::SessionStore;
use super::SessionRecord;

/// Process-local session store.
///
/// Lives as long as the owning process; has no index worth sweeping, so it
/// does not implement `Cleaner`.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, SessionRecord>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self, key: &str) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.get(key).map(|r| r.value().clone()))
    }

    async fn save(
        &self,
        session: &SessionRecord,
        _config: &SessionConfig,
        exists: bool,
    ) -> Result<()> {
        debug!("memory: save {} (exists={})", session.id, exists);
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.sessions.remove(key);
        Ok(())
    }
}
