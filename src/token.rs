//! Access-token caching for the client-credentials flow
//!
//! The cached token is the only state shared across gateway calls. The
//! cache is an injectable seam so tests can substitute a fake instead of
//! touching process globals; the default is a process-lifetime in-memory
//! slot that is replaced on every refresh and read on every call.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::fmt;

/// A bearer token with its local expiry timestamp
#[derive(Clone)]
pub struct AccessToken {
    pub value: String,
    /// Refresh-safe expiry: provider lifetime minus the configured margin
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(value: String, expires_at: DateTime<Utc>) -> Self {
        Self { value, expires_at }
    }

    /// A token is expired once `now` reaches its margin-adjusted expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &mask(&self.value))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn mask(value: &str) -> String {
    if value.len() <= 8 {
        "*".repeat(value.len())
    } else {
        format!("{}...{}", &value[..4], &value[value.len() - 4..])
    }
}

/// Token cache seam. Implementations must be safe to share across
/// concurrent gateway calls.
pub trait TokenCache: Send + Sync {
    fn get(&self) -> Option<AccessToken>;
    fn set(&self, token: AccessToken);
    fn clear(&self);
}

/// Default in-memory token cache: a single slot guarded by a lock
#[derive(Default)]
pub struct InMemoryTokenCache {
    slot: RwLock<Option<AccessToken>>,
}

impl InMemoryTokenCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenCache for InMemoryTokenCache {
    fn get(&self) -> Option<AccessToken> {
        self.slot.read().clone()
    }

    fn set(&self, token: AccessToken) {
        *self.slot.write() = Some(token);
    }

    fn clear(&self) {
        *self.slot.write() = None;
    }
}
