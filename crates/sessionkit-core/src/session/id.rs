//! Session id and CSRF token generation.

use tracing::debug;

use crate::error::{Result, SessionError};
use crate::util::random_string;

use super::store::SessionStore;

/// Length of session ids and CSRF tokens.
pub const ID_LENGTH: usize = 40;

/// Collisions tolerated before id generation gives up.
pub const DEFAULT_MAX_ATTEMPTS: usize = 16;

/// A random token with no uniqueness check.
pub fn random_id() -> String {
    random_string(ID_LENGTH)
}

/// Generate an id suited to `store`.
///
/// Client-held stores get a plain random token. Everything else is probed:
/// a candidate is accepted only once the store reports no record under it,
/// giving up after `store.id_attempts()` collisions.
pub async fn generate_id<S: SessionStore + ?Sized>(store: &S) -> Result<String> {
    if store.self_assigns_id() {
        return Ok(random_id());
    }
    unique_id(store, store.id_attempts()).await
}

/// Probe `store` for an unused id, at most `max_attempts` times.
pub async fn unique_id<S: SessionStore + ?Sized>(store: &S, max_attempts: usize) -> Result<String> {
    for attempt in 1..=max_attempts {
        let candidate = random_id();
        if store.load(&candidate).await?.is_none() {
            return Ok(candidate);
        }
        debug!("Session id collision on {} (attempt {})", store.name(), attempt);
    }
    Err(SessionError::GenerationExhausted {
        attempts: max_attempts,
    }
    .into())
}
