//! Shared prompt building and reply parsing for the built-in stages.

use serde_json::{Map, Value};

use crate::client::extract_json_object;
use crate::error::StageError;

/// Line carrying the utterance a stage works on.
pub const REQUEST_LINE_PREFIX: &str = "사용자 요청:";
/// Line carrying the intent resolved earlier in the chain.
pub const INTENT_LINE_PREFIX: &str = "의도:";

pub const NONE_LABEL: &str = "없음";

pub fn request_line(text: &str) -> String {
    format!("{REQUEST_LINE_PREFIX} {text}")
}

pub fn intent_line(intent: &str) -> String {
    format!("{INTENT_LINE_PREFIX} {intent}")
}

/// Parses the first JSON object in a model reply.
pub fn parse_json_object(reply: &str) -> Result<Map<String, Value>, StageError> {
    let json = extract_json_object(reply)
        .ok_or_else(|| StageError::ResponseParse("reply contains no JSON object".into()))?;
    match serde_json::from_str::<Value>(&json) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(StageError::ResponseParse("reply is not a JSON object".into())),
        Err(err) => Err(StageError::ResponseParse(err.to_string())),
    }
}

pub fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Comma-joined list, or the "none" label when empty.
pub fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        NONE_LABEL.to_string()
    } else {
        items.join(", ")
    }
}

/// `- key: description` lines for a settings object.
pub fn bullet_list(entries: Option<&Map<String, Value>>) -> String {
    let Some(entries) = entries.filter(|map| !map.is_empty()) else {
        return NONE_LABEL.to_string();
    };
    entries
        .iter()
        .map(|(key, value)| match value.as_str() {
            Some(text) => format!("- {key}: {text}"),
            None => format!("- {key}: {value}"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Account-number-like slot values: digit groups joined by dashes.
pub fn looks_like_account(value: &str) -> bool {
    value.contains('-')
        && value.chars().any(|c| c.is_ascii_digit())
        && value.chars().all(|c| c.is_ascii_digit() || c == '-')
}

/// Appends `extra` to `base`, skipping values already present.
pub fn merge_unique(base: &mut Vec<String>, extra: impl IntoIterator<Item = String>) {
    for value in extra {
        if !base.contains(&value) {
            base.push(value);
        }
    }
}
