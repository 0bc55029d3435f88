//! Built-in banking stages: rewriting, preprocessing, supervisor, domain.

mod domain;
mod preprocessing;
mod rewriting;
mod supervisor;

use std::sync::Arc;

use serde_json::Value;

use crate::client::DynReasoningClient;
use crate::state::{ConversationState, string_list, summarize_context};
use crate::tools::ToolExecutor;

pub use domain::DomainStage;
pub use preprocessing::PreprocessingStage;
pub use rewriting::RewritingStage;
pub use supervisor::SupervisorStage;

/// Collaborators injected into the built-in stages.
#[derive(Clone)]
pub struct StageDeps {
    pub client: Arc<DynReasoningClient>,
    pub tools: Arc<dyn ToolExecutor>,
}

impl StageDeps {
    pub fn new(client: Arc<DynReasoningClient>, tools: Arc<dyn ToolExecutor>) -> Self {
        Self { client, tools }
    }
}

const DEFAULT_CONTEXT_ENTRIES: usize = 3;

/// History summary from the `conversation_context` field of a stage input.
fn context_summary(input: &Value, max_entries: Option<usize>) -> String {
    summarize_context(
        input.get("conversation_context").unwrap_or(&Value::Null),
        max_entries.unwrap_or(DEFAULT_CONTEXT_ENTRIES),
    )
}

/// Accounts recorded in earlier turns' digests, oldest first.
fn accounts_mentioned(input: &Value) -> Vec<String> {
    input
        .get("conversation_context")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .flat_map(|entry| {
                    string_list(
                        entry
                            .get("extracted_info")
                            .and_then(|info| info.get("accounts_mentioned")),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Slots enriched with what the conversation already resolved.
fn enhanced_slots(slots: Vec<String>, input: &Value, state: &ConversationState) -> Vec<String> {
    let mut enhanced = slots;
    super::prompt::merge_unique(&mut enhanced, accounts_mentioned(input));
    super::prompt::merge_unique(&mut enhanced, state.selected_entity.clone());
    enhanced
}

fn slot_line(input: &Value) -> String {
    format!(
        "슬롯: {}",
        super::prompt::join_or_none(&string_list(input.get("slot")))
    )
}
