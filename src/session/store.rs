use async_trait::async_trait;
use chrono::Utc;

use crate::error::StoreError;
use crate::state::ConversationState;

use super::compaction::{CompactionOutcome, CompactionPolicy, compact_record};
use super::types::{ConversationTurn, CustomerInfo, ErrorMarker, SessionInfo, SessionRecord};

/// Durable per-session turn history.
///
/// Backends implement the four record primitives; every higher-level operation
/// is a read-modify-write over them. Callers serialise writers per session
/// (see [`super::SessionLocks`]).
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// Replaces the stored record atomically.
    async fn save(&self, record: &SessionRecord) -> Result<(), StoreError>;

    async fn delete(&self, session_id: &str) -> Result<bool, StoreError>;

    async fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Turns retained per record.
    fn max_history(&self) -> usize;

    async fn create(
        &self,
        session_id: &str,
        customer_info: CustomerInfo,
    ) -> Result<SessionRecord, StoreError> {
        let record = SessionRecord::new(session_id, customer_info);
        self.save(&record).await?;
        Ok(record)
    }

    async fn append_turn(&self, session_id: &str, turn: ConversationTurn) -> Result<(), StoreError> {
        let mut record = self.require(session_id).await?;
        record.push_turn(turn, self.max_history());
        self.save(&record).await
    }

    /// Newest `limit` turns, oldest first. Unknown sessions have no history.
    async fn get_history(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        Ok(self
            .load(session_id)
            .await?
            .map(|record| record.recent(limit))
            .unwrap_or_default())
    }

    async fn info(&self, session_id: &str) -> Result<Option<SessionInfo>, StoreError> {
        Ok(self.load(session_id).await?.map(|record| record.info()))
    }

    /// Flags the session's last turn as failed.
    async fn mark_error(&self, session_id: &str, message: &str) -> Result<(), StoreError> {
        let mut record = self.require(session_id).await?;
        let now = Utc::now();
        record.error_recovery = Some(ErrorMarker {
            error_message: message.to_string(),
            recorded_at: now,
        });
        record.last_updated = now;
        self.save(&record).await
    }

    /// Overwrites the current state, and the latest turn's snapshot so the next
    /// turn starts from it. Returns `false` for unknown sessions.
    async fn update_state(
        &self,
        session_id: &str,
        state: ConversationState,
    ) -> Result<bool, StoreError> {
        let Some(mut record) = self.load(session_id).await? else {
            return Ok(false);
        };
        if let Some(latest) = record.history.last_mut() {
            latest.state_snapshot = Some(state.clone());
        }
        record.current_state = state;
        record.last_updated = Utc::now();
        self.save(&record).await?;
        Ok(true)
    }

    async fn clear_state(&self, session_id: &str) -> Result<bool, StoreError> {
        self.update_state(session_id, ConversationState::default()).await
    }

    async fn compact(
        &self,
        session_id: &str,
        policy: &CompactionPolicy,
    ) -> Result<CompactionOutcome, StoreError> {
        let Some(mut record) = self.load(session_id).await? else {
            return Ok(CompactionOutcome::Untouched);
        };
        let outcome = compact_record(&mut record, policy)?;
        if outcome != CompactionOutcome::Untouched {
            self.save(&record).await?;
        }
        Ok(outcome)
    }

    async fn require(&self, session_id: &str) -> Result<SessionRecord, StoreError> {
        self.load(session_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }
}
