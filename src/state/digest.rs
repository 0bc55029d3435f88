use serde::Serialize;
use serde_json::{Value, json};

use crate::session::ConversationTurn;

use super::extractor::state_after;

/// What a past turn contributes to prompt context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TurnDigest {
    pub intent: Option<String>,
    pub slots: Vec<String>,
    pub accounts_mentioned: Vec<String>,
}

impl TurnDigest {
    pub fn of(turn: &ConversationTurn) -> Self {
        let state = state_after(turn);
        Self {
            intent: state.last_intent,
            slots: state.last_slots.into_iter().collect(),
            accounts_mentioned: state.selected_entity.into_iter().collect(),
        }
    }
}

/// Recent history as the `conversation_context` list carried through the chain.
pub fn context_entries(history: &[ConversationTurn]) -> Value {
    Value::Array(
        history
            .iter()
            .map(|turn| {
                json!({
                    "timestamp": turn.timestamp.to_rfc3339(),
                    "user_query": turn.user_query,
                    "final_response_text": turn.final_response_text,
                    "extracted_info": TurnDigest::of(turn),
                })
            })
            .collect(),
    )
}

/// One line per entry, newest `max_entries` only, for inclusion in prompts.
pub fn summarize_context(entries: &Value, max_entries: usize) -> String {
    let Some(entries) = entries.as_array().filter(|list| !list.is_empty()) else {
        return "이전 대화 없음".to_string();
    };

    let skip = entries.len().saturating_sub(max_entries);
    entries
        .iter()
        .skip(skip)
        .enumerate()
        .map(|(index, entry)| {
            let query = entry.get("user_query").and_then(Value::as_str).unwrap_or("");
            let info = entry.get("extracted_info");
            let mut line = format!("대화 {}: {query}", index + 1);
            if let Some(intent) = info
                .and_then(|info| info.get("intent"))
                .and_then(Value::as_str)
            {
                line.push_str(&format!(" (의도: {intent})"));
            }
            let accounts = string_list(info.and_then(|info| info.get("accounts_mentioned")));
            if !accounts.is_empty() {
                line.push_str(&format!(" (계좌: {})", accounts.join(", ")));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
