//! Session memory over a checkpoint backend
//!
//! Loads and saves whole conversation logs keyed by session id, and hands
//! out per-session locks so a load/save pair of one session never
//! interleaves with another turn of the same session.

use groundline_common::checkpoint::{keys, CheckpointBackend};
use groundline_common::errors::{AppError, Result};
use groundline_common::metrics;
use groundline_common::models::{Checkpoint, Session};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

/// Lock map size above which idle entries are pruned
const PRUNE_THRESHOLD: usize = 256;

/// Longest user hint kept in a generated session id
const MAX_HINT_LEN: usize = 32;

/// Exclusive hold on one session, released on drop
pub struct SessionGuard {
    session_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

pub struct SessionStore {
    backend: Arc<dyn CheckpointBackend>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn CheckpointBackend>) -> Self {
        Self {
            backend,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn CheckpointBackend> {
        &self.backend
    }

    /// Allocate a fresh id of the form `user_<hint>_<uuid>`
    pub fn create_session(&self, user_hint: Option<&str>) -> String {
        let hint: String = user_hint
            .unwrap_or_default()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(MAX_HINT_LEN)
            .collect::<String>()
            .to_ascii_lowercase();
        let hint = if hint.is_empty() { "anonymous".to_string() } else { hint };

        format!("user_{}_{}", hint, Uuid::new_v4().simple())
    }

    /// Wait for exclusive access to `session_id`
    pub async fn lock(&self, session_id: &str) -> SessionGuard {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            if locks.len() > PRUNE_THRESHOLD {
                // Entries only referenced by the map have no holder or waiter
                locks.retain(|_, m| Arc::strong_count(m) > 1);
            }
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        SessionGuard {
            session_id: session_id.to_string(),
            _guard: mutex.lock_owned().await,
        }
    }

    /// Stored session, `None` when the id has never been saved
    pub async fn fetch(&self, session_id: &str) -> Result<Option<Session>> {
        let raw = self.backend.get(&keys::session(session_id)).await?;
        raw.map(|raw| Checkpoint::decode(session_id, &raw).map(Checkpoint::into_session))
            .transpose()
    }

    /// Stored session, or an empty one when unknown or unreadable
    pub async fn load(&self, session_id: &str) -> Session {
        match self.fetch(session_id).await {
            Ok(Some(session)) => {
                debug!(session_id, turns = session.len(), "Session loaded");
                session
            }
            Ok(None) => {
                debug!(session_id, "New session");
                Session::empty(session_id)
            }
            Err(e) => {
                warn!(session_id, error = %e, "Session load failed, starting empty");
                Session::empty(session_id)
            }
        }
    }

    /// Replace the stored checkpoint for this session
    pub async fn save(&self, session: &Session) -> Result<()> {
        let raw = Checkpoint::from_session(session).encode()?;

        self.backend
            .set(&keys::session(session.id()), &raw)
            .await
            .map_err(|e| {
                metrics::record_persistence_failure(self.backend.name());
                match e {
                    AppError::Persistence { .. } => e,
                    other => AppError::Persistence {
                        message: other.to_string(),
                    },
                }
            })?;

        debug!(session_id = session.id(), turns = session.len(), "Session saved");
        Ok(())
    }
}
