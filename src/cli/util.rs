use serde_json::Value;
use uuid::Uuid;

use teller::session::CustomerInfo;

pub(crate) fn session_id_or_new(session: Option<String>) -> String {
    session
        .map(|id| id.trim().to_owned())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub(crate) fn customer_info(name: Option<String>) -> Option<CustomerInfo> {
    let name = name?.trim().to_owned();
    if name.is_empty() {
        return None;
    }
    let mut info = CustomerInfo::new();
    info.insert("name".into(), Value::String(name));
    Some(info)
}

/// Shortens long trace text for terminal display.
pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}…")
}
