use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{Result, StorageError};

use super::cookie::{Cookie, CookieJar};
use super::store::SessionStore;
use super::SessionRecord;

type HmacSha256 = Hmac<Sha256>;

/// Cookie holding the whole serialized session.
pub const PAYLOAD_COOKIE: &str = "session_payload";

/// Client-held session store.
///
/// The record travels inside a signed cookie, so there is no server-side
/// index: ids are self-assigned and nothing can be swept.
pub struct CookieSessionStore {
    jar: Arc<dyn CookieJar>,
    secret: Vec<u8>,
}

impl CookieSessionStore {
    pub fn new(jar: Arc<dyn CookieJar>, secret: &str) -> Self {
        if secret.is_empty() {
            warn!(
                "cookie session store has no cookie_secret; payloads are signed with an empty key"
            );
        }
        Self {
            jar,
            secret: secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self) -> std::result::Result<HmacSha256, StorageError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| StorageError::Cookie(e.to_string()))
    }

    /// `base64(json).hex(hmac)`
    pub fn encode(&self, session: &SessionRecord) -> Result<String> {
        let json = serde_json::to_vec(session).map_err(StorageError::from)?;
        let body = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json);
        let mut mac = self.mac()?;
        mac.update(body.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}", body, signature))
    }

    /// Verify and decode a payload cookie.
    pub fn decode(&self, raw: &str) -> std::result::Result<SessionRecord, StorageError> {
        let (body, signature) = raw
            .rsplit_once('.')
            .ok_or_else(|| StorageError::Cookie("missing signature".into()))?;
        let signature =
            hex::decode(signature).map_err(|e| StorageError::Cookie(e.to_string()))?;

        let mut mac = self.mac()?;
        mac.update(body.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| StorageError::Cookie("signature mismatch".into()))?;

        let json = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|e| StorageError::Cookie(e.to_string()))?;
        Ok(serde_json::from_slice(&json)?)
    }
}

#[async_trait]
impl SessionStore for CookieSessionStore {
    fn name(&self) -> &str {
        "cookie"
    }

    async fn load(&self, _key: &str) -> Result<Option<SessionRecord>> {
        let Some(raw) = self.jar.get(PAYLOAD_COOKIE) else {
            return Ok(None);
        };
        match self.decode(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Discarding session payload cookie: {}", e);
                Ok(None)
            }
        }
    }

    async fn save(
        &self,
        session: &SessionRecord,
        config: &SessionConfig,
        _exists: bool,
    ) -> Result<()> {
        let value = self.encode(session)?;
        debug!("cookie: save {} ({} bytes)", session.id, value.len());
        self.jar.put(Cookie::scoped(PAYLOAD_COOKIE, value, config));
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        self.jar.forget(PAYLOAD_COOKIE);
        Ok(())
    }

    fn self_assigns_id(&self) -> bool {
        true
    }
}
