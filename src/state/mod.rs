//! Structured per-session conversation memory.
//!
//! The state valid after a turn is snapshotted into that turn's record. The
//! next turn reads it back through [`ConversationStateExtractor`], which falls
//! back to mining the trace text only for records written before snapshots
//! existed.

mod digest;
mod extractor;
mod legacy;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub use digest::{TurnDigest, context_entries, summarize_context};
pub(crate) use digest::string_list;
pub use extractor::ConversationStateExtractor;
pub use legacy::{LEGACY_DOMAIN_MARKER, LEGACY_PREPROCESSING_MARKER};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationState {
    /// Entity the user last resolved, typically an account number.
    #[serde(alias = "selected_account")]
    pub selected_entity: Option<String>,
    pub last_intent: Option<String>,
    pub last_slots: BTreeSet<String>,
    pub pending_action: Option<String>,
    pub missing_slots: BTreeSet<String>,
}

impl ConversationState {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Multi-line description for prompts and the CLI.
    pub fn describe(&self) -> String {
        if self.is_empty() {
            return "상태 정보 없음".to_string();
        }

        let mut lines = Vec::new();
        if let Some(entity) = &self.selected_entity {
            lines.push(format!("선택된 계좌: {entity}"));
        }
        if let Some(intent) = &self.last_intent {
            lines.push(format!("이전 의도: {intent}"));
        }
        if !self.last_slots.is_empty() {
            lines.push(format!("이전 슬롯: {}", join(&self.last_slots)));
        }
        if let Some(action) = &self.pending_action {
            lines.push(format!("대기 중인 작업: {action}"));
        }
        if !self.missing_slots.is_empty() {
            lines.push(format!("누락된 정보: {}", join(&self.missing_slots)));
        }
        lines.join("\n")
    }
}

fn join(values: &BTreeSet<String>) -> String {
    values.iter().cloned().collect::<Vec<_>>().join(", ")
}
