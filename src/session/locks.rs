use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Session-keyed mutual exclusion for read-modify-write turns.
#[derive(Debug, Clone, Default)]
pub struct SessionLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

pub type SessionGuard = OwnedMutexGuard<()>;

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other holder owns `session_id`.
    pub async fn acquire(&self, session_id: &str) -> SessionGuard {
        self.slot(session_id).lock_owned().await
    }

    /// Returns `None` immediately if the session is busy.
    pub fn try_acquire(&self, session_id: &str) -> Option<SessionGuard> {
        self.slot(session_id).try_lock_owned().ok()
    }

    fn slot(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Drop slots nobody holds or waits on.
        map.retain(|id, slot| id == session_id || Arc::strong_count(slot) > 1);
        map.entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}
