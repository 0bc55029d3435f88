use chrono::Utc;

use crate::error::StoreError;

use super::types::{CompactionInfo, SessionRecord};

pub const COMPACTED_TRACE: &str = "[압축됨]";

/// Size thresholds measured on the serialised record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionPolicy {
    /// Above this, history is trimmed to `keep_turns`.
    pub soft_limit_bytes: u64,
    /// Above this, history is trimmed and older traces are cleared as well.
    pub hard_limit_bytes: u64,
    pub keep_turns: usize,
}

impl CompactionPolicy {
    pub fn new(soft_limit_bytes: u64, hard_limit_bytes: u64, max_history: usize) -> Self {
        Self {
            soft_limit_bytes,
            hard_limit_bytes,
            keep_turns: (max_history * 4 / 5).max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionOutcome {
    Untouched,
    Trimmed { removed: usize },
    Compressed { removed: usize, cleared_traces: usize },
}

pub(crate) fn compact_record(
    record: &mut SessionRecord,
    policy: &CompactionPolicy,
) -> Result<CompactionOutcome, StoreError> {
    let size = serde_json::to_vec_pretty(record)?.len() as u64;
    if size <= policy.soft_limit_bytes {
        return Ok(CompactionOutcome::Untouched);
    }

    let original_count = record.history.len();
    let removed = original_count.saturating_sub(policy.keep_turns);
    record.history.drain(..removed);

    let mut cleared_traces = 0;
    if size > policy.hard_limit_bytes {
        // The newest trace stays readable for snapshot-less state recovery.
        let keep_last = record.history.len().saturating_sub(1);
        for turn in record.history.iter_mut().take(keep_last) {
            if turn.trace_record != COMPACTED_TRACE {
                turn.trace_record = COMPACTED_TRACE.to_string();
                cleared_traces += 1;
            }
        }
    }

    if removed == 0 && cleared_traces == 0 {
        return Ok(CompactionOutcome::Untouched);
    }

    record.compaction = Some(CompactionInfo {
        compacted_at: Utc::now(),
        original_count,
        compacted_count: record.history.len(),
    });

    if size > policy.hard_limit_bytes {
        Ok(CompactionOutcome::Compressed {
            removed,
            cleared_traces,
        })
    } else {
        Ok(CompactionOutcome::Trimmed { removed })
    }
}
