//! Handoff codes: short-lived, single-use references to a refresh token.
//!
//! Used to carry a session across a redirect without putting the raw refresh
//! token in a URL.

use std::sync::Arc;
use std::time::Duration;

use super::single_use::{DEFAULT_CAPACITY, SingleUseStore};

/// Default handoff code lifetime: 120 seconds.
pub const HANDOFF_TTL: Duration = Duration::from_secs(120);

/// Store of handoff code → refresh token.
pub struct HandoffStore {
    inner: Arc<SingleUseStore<String>>,
}

impl HandoffStore {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Arc::new(SingleUseStore::new(ttl, capacity)),
        }
    }

    /// Mint a code for `refresh_token`.
    pub fn make_code(&self, refresh_token: &str) -> String {
        self.inner.insert(refresh_token.to_string())
    }

    /// Redeem a code. Succeeds at most once, and only within the TTL.
    pub fn pop_refresh(&self, code: &str) -> Option<String> {
        self.inner.take(code)
    }

    pub fn cleanup(&self) {
        self.inner.cleanup();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Periodic sweep of expired codes.
    pub fn spawn_cleanup_task(&self) -> tokio::task::JoinHandle<()> {
        self.inner.spawn_cleanup_task()
    }
}

impl Default for HandoffStore {
    fn default() -> Self {
        Self::new(HANDOFF_TTL, DEFAULT_CAPACITY)
    }
}
