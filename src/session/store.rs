use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::{SESSION_TTL_SECS, SWEEP_INTERVAL_SECS};
use crate::session::types::{Session, SessionState, SessionStatus};

/// In-memory session registry with TTL-based reclaim.
///
/// An injectable value, never a process global: tests construct their own
/// store and drive `sweep` with a controlled clock.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, Session>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_ttl(Duration::seconds(SESSION_TTL_SECS as i64))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Opaque URL-safe id from 16 random bytes.
    fn new_id() -> String {
        let bytes: [u8; 16] = rand::thread_rng().gen();
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Insert a fresh session in the given entry state.
    pub async fn create(&self, state: SessionState) -> Session {
        let now = Utc::now();
        let session = Session {
            id: Self::new_id(),
            state,
            created_at: now,
            expires_at: now + self.ttl,
        };
        let mut map = self.inner.write().await;
        map.insert(session.id.clone(), session.clone());
        debug!(session_id = %session.id, status = ?session.status(), "session created");
        session
    }

    pub async fn get(&self, id: &str) -> Option<Session> {
        self.inner.read().await.get(id).cloned()
    }

    /// Mutate a session in place. Invariants (sid immutability, legal status
    /// moves) are enforced by the `Session` methods the closure calls, not
    /// by the store itself.
    pub async fn update<F>(&self, id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut Session),
    {
        let mut map = self.inner.write().await;
        match map.get_mut(id) {
            Some(session) => {
                mutate(session);
                true
            }
            None => false,
        }
    }

    /// Linear scan for the pending session holding this OAuth state. Session
    /// counts are small and short-lived, so no secondary index.
    pub async fn find_by_state(&self, oauth_state: &str) -> Option<Session> {
        let map = self.inner.read().await;
        map.values()
            .find(|s| {
                s.pending_auth()
                    .map(|p| p.state == oauth_state)
                    .unwrap_or(false)
            })
            .cloned()
    }

    /// Linear scan for a completed session carrying this access token.
    pub async fn find_by_access_token(&self, token: &str) -> Option<Session> {
        let map = self.inner.read().await;
        map.values()
            .find(|s| {
                s.status() == SessionStatus::Completed
                    && s.completed()
                        .map(|c| c.oauth.access_token == token)
                        .unwrap_or(false)
            })
            .cloned()
    }

    /// Reset a session's lifetime to a full TTL from now.
    pub async fn extend(&self, id: &str) -> bool {
        let ttl = self.ttl;
        self.update(id, |s| s.extend(ttl)).await
    }

    /// Drop every session whose expiry is behind `now`; returns the count.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut map = self.inner.write().await;
        let before = map.len();
        map.retain(|_, s| !s.is_expired(now));
        before - map.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task sweeping expired sessions every 60 seconds.
pub fn spawn_sweeper(store: SessionStore) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS)).await;
            let removed = store.sweep(Utc::now()).await;
            if removed > 0 {
                debug!(removed, "expired sessions swept");
            }
        }
    })
}
