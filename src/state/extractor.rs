use tracing::debug;

use crate::session::{ConversationTurn, SessionRecord};

use super::ConversationState;
use super::legacy;

/// Rebuilds the state a new turn starts from. Never fails: a missing or
/// unreadable record yields the zero-value state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConversationStateExtractor;

impl ConversationStateExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, history: &[ConversationTurn]) -> ConversationState {
        let Some(latest) = history.last() else {
            return ConversationState::default();
        };
        state_after(latest)
    }

    /// State a new turn on `record` starts from, independent of how much
    /// history is shown to the stages. Falls back to the record's
    /// `current_state` when the latest turn yields nothing, which also covers
    /// state set on a session that has no turns yet.
    pub fn extract_record(&self, record: &SessionRecord) -> ConversationState {
        let recovered = self.extract(&record.history[record.history.len().saturating_sub(1)..]);
        if recovered.is_empty() {
            return record.current_state.clone();
        }
        recovered
    }
}

/// State valid after `turn`: its snapshot when present, otherwise whatever the
/// trace text still yields.
pub(crate) fn state_after(turn: &ConversationTurn) -> ConversationState {
    if let Some(snapshot) = &turn.state_snapshot {
        return snapshot.clone();
    }
    debug!("turn has no state snapshot, recovering from trace");
    legacy::recover_state(&turn.trace_record)
}
