//! State recovery from trace text, for turns persisted without a snapshot.
//!
//! A trace holds one line per stage section, `"<Label> Agent Output: {json}"`.
//! Every failure here is swallowed; the affected fields stay at their zero value.

use serde_json::Value;
use tracing::debug;

use super::ConversationState;

pub const LEGACY_PREPROCESSING_MARKER: &str = "Preprocessing Agent Output:";
pub const LEGACY_DOMAIN_MARKER: &str = "Domain Agent Output:";

pub(crate) fn recover_state(trace: &str) -> ConversationState {
    let mut state = ConversationState::default();

    if let Some(domain) = section_json(trace, LEGACY_DOMAIN_MARKER) {
        state.selected_entity = domain
            .get("tool_output")
            .and_then(|output| output.get("account_number"))
            .and_then(Value::as_str)
            .map(str::to_string);
    }

    if let Some(preprocessing) = section_json(trace, LEGACY_PREPROCESSING_MARKER) {
        state.last_intent = preprocessing
            .get("intent")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(slots) = preprocessing.get("slot").and_then(Value::as_array) {
            state.last_slots = slots
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }
    }

    state
}

/// JSON following the first occurrence of `marker`, up to the end of that line.
pub(crate) fn section_json(trace: &str, marker: &str) -> Option<Value> {
    let start = trace.find(marker)? + marker.len();
    let rest = &trace[start..];
    let line = rest.split('\n').next().unwrap_or(rest).trim();

    match serde_json::from_str::<Value>(line) {
        Ok(value) if value.is_object() => Some(value),
        Ok(_) => None,
        Err(err) => {
            debug!(marker, error = %err, "trace section is not valid JSON");
            None
        }
    }
}
