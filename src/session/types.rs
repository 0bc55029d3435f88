use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::state::ConversationState;

/// Externally supplied customer metadata (`name`, tier, ...).
pub type CustomerInfo = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub user_query: String,
    #[serde(alias = "agent_response")]
    pub final_response_text: String,
    /// Per-stage input/output audit text. Never the primary state source.
    #[serde(default, alias = "agent_log")]
    pub trace_record: String,
    /// State valid after this turn. Absent on records written before snapshots.
    #[serde(
        default,
        deserialize_with = "lenient_snapshot",
        skip_serializing_if = "Option::is_none"
    )]
    pub state_snapshot: Option<ConversationState>,
}

impl ConversationTurn {
    pub fn new(
        user_query: impl Into<String>,
        final_response_text: impl Into<String>,
        trace_record: impl Into<String>,
        state_snapshot: Option<ConversationState>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            user_query: user_query.into(),
            final_response_text: final_response_text.into(),
            trace_record: trace_record.into(),
            state_snapshot,
        }
    }
}

/// Set when a turn aborted on an infrastructure failure; cleared by the next
/// completed turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMarker {
    pub error_message: String,
    #[serde(with = "timestamp")]
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionInfo {
    #[serde(with = "timestamp")]
    pub compacted_at: DateTime<Utc>,
    pub original_count: usize,
    pub compacted_count: usize,
}

/// One JSON document per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub customer_info: CustomerInfo,
    #[serde(default, rename = "conversation_history")]
    pub history: Vec<ConversationTurn>,
    #[serde(default, alias = "current_context", deserialize_with = "lenient_state")]
    pub current_state: ConversationState,
    #[serde(default)]
    pub turn_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_recovery: Option<ErrorMarker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compaction: Option<CompactionInfo>,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>, customer_info: CustomerInfo) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            created_at: now,
            last_updated: now,
            customer_info,
            history: Vec::new(),
            current_state: ConversationState::default(),
            turn_count: 0,
            error_recovery: None,
            compaction: None,
        }
    }

    /// Appends a completed turn, adopts its snapshot as the current state and
    /// drops the oldest turns beyond `max_history`.
    pub fn push_turn(&mut self, turn: ConversationTurn, max_history: usize) {
        if let Some(snapshot) = &turn.state_snapshot {
            self.current_state = snapshot.clone();
        }
        self.history.push(turn);
        let excess = self.history.len().saturating_sub(max_history.max(1));
        if excess > 0 {
            self.history.drain(..excess);
        }
        // Legacy records lack the counter; never report fewer turns than kept.
        self.turn_count = self.turn_count.max(self.history.len() as u64 - 1) + 1;
        self.error_recovery = None;
        self.last_updated = Utc::now();
    }

    /// Newest `limit` turns, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ConversationTurn> {
        let skip = self.history.len().saturating_sub(limit);
        self.history[skip..].to_vec()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.clone(),
            created_at: self.created_at,
            last_updated: self.last_updated,
            customer_info: self.customer_info.clone(),
            conversation_count: self.history.len(),
            turn_count: self.turn_count,
            current_state: self.current_state.clone(),
            error_recovery: self.error_recovery.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub customer_info: CustomerInfo,
    pub conversation_count: usize,
    pub turn_count: u64,
    pub current_state: ConversationState,
    pub error_recovery: Option<ErrorMarker>,
}

fn lenient_snapshot<'de, D>(deserializer: D) -> Result<Option<ConversationState>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    if raw.is_null() {
        return Ok(None);
    }
    Ok(serde_json::from_value(raw).ok())
}

fn lenient_state<'de, D>(deserializer: D) -> Result<ConversationState, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(raw).unwrap_or_default())
}

/// RFC 3339 on write; also accepts zone-less ISO timestamps (read as UTC).
pub(crate) mod timestamp {
    use super::*;

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp `{raw}`")))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}
