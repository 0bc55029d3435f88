use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;

use super::store::SessionStore;
use super::types::SessionRecord;

/// Process-local store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    records: RwLock<HashMap<String, SessionRecord>>,
    max_history: usize,
}

impl MemorySessionStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            max_history,
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.records.read().await.get(session_id).cloned())
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(session_id).is_some())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.records.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn max_history(&self) -> usize {
        self.max_history.max(1)
    }
}
