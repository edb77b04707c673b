//! In-memory, bounded, single-use values with a TTL.
//!
//! Backs handoff codes and pending OAuth login state. Taking an entry removes
//! it atomically, so two concurrent redemptions of one key cannot both win.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use dashmap::DashMap;
use rand::RngCore;
use tracing::debug;

/// Default upper bound on live entries.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Sweep interval for [`SingleUseStore::spawn_cleanup_task`].
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

struct Entry<V> {
    value: V,
    created_at: Instant,
}

/// Keyed single-use store with per-store TTL and capacity.
pub struct SingleUseStore<V> {
    entries: DashMap<String, Entry<V>>,
    ttl: Duration,
    capacity: usize,
}

impl<V: Send + Sync + 'static> SingleUseStore<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store `value` under a fresh random key and return the key.
    pub fn insert(&self, value: V) -> String {
        let key = generate_key();
        self.insert_with_key(key.clone(), value, Instant::now());
        key
    }

    fn insert_with_key(&self, key: String, value: V, created_at: Instant) {
        if self.entries.len() >= self.capacity {
            self.cleanup();
        }
        if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.entries.insert(key, Entry { value, created_at });
    }

    /// Remove and return the value for `key`.
    ///
    /// Returns `None` if not found or expired; an expired entry is consumed either way.
    pub fn take(&self, key: &str) -> Option<V> {
        let (_, entry) = self.entries.remove(key)?;
        if entry.created_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.value)
    }

    /// Evict expired entries.
    pub fn cleanup(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.created_at.elapsed() <= ttl);
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().created_at)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            debug!("single-use store at capacity, evicted oldest entry");
        }
    }

    /// Spawn a periodic cleanup task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                store.cleanup();
            }
        })
    }
}

/// 24 random bytes, URL-safe base64 without padding.
pub fn generate_key() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
