use async_trait::async_trait;

use crate::config::SessionConfig;
use crate::error::Result;

use super::id::{self, DEFAULT_MAX_ATTEMPTS};
use super::SessionRecord;

/// Trait for session storage backends.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &str;

    /// Load a session by id. Unknown or malformed ids yield `Ok(None)`.
    async fn load(&self, key: &str) -> Result<Option<SessionRecord>>;

    /// Persist the full record; `exists` tells whether it was loaded from storage.
    async fn save(
        &self,
        session: &SessionRecord,
        config: &SessionConfig,
        exists: bool,
    ) -> Result<()>;

    /// Delete a session. Deleting an unknown id is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Stores with no server-side index (the client holds the record) hand out
    /// ids without a uniqueness lookup.
    fn self_assigns_id(&self) -> bool {
        false
    }

    /// Collisions tolerated before id generation gives up.
    fn id_attempts(&self) -> usize {
        DEFAULT_MAX_ATTEMPTS
    }

    /// Bulk expiry capability, for stores with something to sweep.
    fn cleaner(&self) -> Option<&dyn Cleaner> {
        None
    }

    /// Get a new session id that isn't assigned to any current session.
    async fn new_id(&self) -> Result<String> {
        id::generate_id(self).await
    }

    /// Create a fresh record with a new id and empty flash partitions.
    async fn fresh(&self) -> Result<SessionRecord> {
        fresh_record(self).await
    }
}

/// Stores that can delete every session idle since before a cutoff.
#[async_trait]
pub trait Cleaner: Send + Sync {
    /// Delete records whose `last_activity` is older than `threshold` (Unix
    /// seconds). Returns how many were removed.
    async fn clean(&self, threshold: i64) -> Result<u64>;
}

/// Default `fresh()`: a record under a newly generated id.
pub async fn fresh_record<S: SessionStore + ?Sized>(store: &S) -> Result<SessionRecord> {
    Ok(SessionRecord::new(store.new_id().await?))
}
