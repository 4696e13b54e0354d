//! Per-session content key registry
//!
//! Replaces a single process-wide key: each session installs its own CEK
//! through the handshake, and media requests only ever see the key of the
//! session they carry. Keys not used for the configured idle period are
//! dropped by [`KeyRegistry::evict_idle`], which the daemon runs on a timer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use twilight_crypto::ContentKey;

use crate::session::SessionId;

struct Entry {
    key: Arc<ContentKey>,
    /// Milliseconds since the registry epoch
    last_used: AtomicU64,
}

/// Shared map of `SessionId -> ContentKey`. Cheap to clone.
#[derive(Clone)]
pub struct KeyRegistry {
    inner: Arc<RwLock<HashMap<SessionId, Entry>>>,
    epoch: Instant,
}

impl Default for KeyRegistry {
    fn default() -> Self {
        Self {
            inner: Arc::default(),
            epoch: Instant::now(),
        }
    }
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Install (or replace) the key for `session`. Returns true if a key was replaced.
    pub async fn install(&self, session: SessionId, key: ContentKey) -> bool {
        let entry = Entry {
            key: Arc::new(key),
            last_used: AtomicU64::new(self.now_ms()),
        };
        let mut map = self.inner.write().await;
        debug!(session = session.short(), "content key installed");
        map.insert(session, entry).is_some()
    }

    /// Look up the key for `session`, marking it as recently used.
    pub async fn get(&self, session: &SessionId) -> Option<Arc<ContentKey>> {
        let map = self.inner.read().await;
        let entry = map.get(session)?;
        entry.last_used.store(self.now_ms(), Ordering::Relaxed);
        Some(entry.key.clone())
    }

    /// Forget the key for `session`. Returns true if one was present.
    pub async fn remove(&self, session: &SessionId) -> bool {
        let removed = self.inner.write().await.remove(session).is_some();
        if removed {
            debug!(session = session.short(), "content key removed");
        }
        removed
    }

    /// Drop every key not installed or used within `max_idle`. Returns how many were dropped.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let cutoff = self.now_ms().saturating_sub(max_idle.as_millis() as u64);
        let mut map = self.inner.write().await;
        let before = map.len();
        map.retain(|_, entry| entry.last_used.load(Ordering::Relaxed) >= cutoff);
        before - map.len()
    }

    /// Run [`evict_idle`](Self::evict_idle) every `max_idle / 4` until `shutdown` fires.
    pub async fn run_eviction(self, max_idle: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval((max_idle / 4).max(Duration::from_secs(1)));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = self.evict_idle(max_idle).await;
                    if evicted > 0 {
                        info!(evicted, "idle session keys dropped");
                    }
                }
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> SessionId {
        SessionId::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_install_get_remove() {
        let registry = KeyRegistry::new();
        assert!(registry.is_empty().await);

        assert!(!registry.install(sid("a"), ContentKey::from_bytes([1u8; 32])).await);
        let key = registry.get(&sid("a")).await.unwrap();
        assert_eq!(key.as_bytes(), &[1u8; 32]);

        assert!(registry.remove(&sid("a")).await);
        assert!(registry.get(&sid("a")).await.is_none());
        assert!(!registry.remove(&sid("a")).await);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let registry = KeyRegistry::new();
        registry.install(sid("alice"), ContentKey::from_bytes([1u8; 32])).await;
        registry.install(sid("bob"), ContentKey::from_bytes([2u8; 32])).await;

        assert_eq!(registry.get(&sid("alice")).await.unwrap().as_bytes(), &[1u8; 32]);
        assert_eq!(registry.get(&sid("bob")).await.unwrap().as_bytes(), &[2u8; 32]);
        assert!(registry.get(&sid("carol")).await.is_none());
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_replace_reports_previous() {
        let registry = KeyRegistry::new();
        registry.install(sid("a"), ContentKey::from_bytes([1u8; 32])).await;
        assert!(registry.install(sid("a"), ContentKey::from_bytes([9u8; 32])).await);
        assert_eq!(registry.get(&sid("a")).await.unwrap().as_bytes(), &[9u8; 32]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_idle_keeps_recently_used() {
        let registry = KeyRegistry::new();
        registry.install(sid("idle"), ContentKey::from_bytes([1u8; 32])).await;
        registry.install(sid("busy"), ContentKey::from_bytes([2u8; 32])).await;

        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(registry.get(&sid("busy")).await.is_some());
        tokio::time::advance(Duration::from_secs(20)).await;

        assert_eq!(registry.evict_idle(Duration::from_secs(60)).await, 1);
        assert!(registry.get(&sid("idle")).await.is_none());
        assert!(registry.get(&sid("busy")).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_task_stops_on_shutdown() {
        let registry = KeyRegistry::new();
        registry.install(sid("a"), ContentKey::from_bytes([1u8; 32])).await;

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(registry.clone().run_eviction(Duration::from_secs(60), shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert!(registry.is_empty().await);

        shutdown.cancel();
        task.await.unwrap();
    }
}
