use std::path::PathBuf;

use dirs::home_dir;

use super::constants::*;
use super::types::{LlmProvider, LlmSettings, PipelineSettings, SessionSettings};

pub fn default_user_agent() -> String {
    format!("teller/{}", env!("CARGO_PKG_VERSION"))
}

pub fn default_session_dir() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(DEFAULT_SESSION_DIR),
        None => PathBuf::from("sessions"),
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        let provider = LlmProvider::OpenAi;
        Self {
            provider,
            api_key: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            base_url: provider.default_base_url().to_string(),
            user_agent: default_user_agent(),
            model: provider.default_model().to_string(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            dir: default_session_dir(),
            max_history: DEFAULT_MAX_HISTORY,
            history_window: DEFAULT_HISTORY_WINDOW,
            compaction_soft_limit_bytes: DEFAULT_COMPACTION_SOFT_LIMIT_BYTES,
            compaction_hard_limit_bytes: DEFAULT_COMPACTION_HARD_LIMIT_BYTES,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            stages_dir: None,
            entry_stage: DEFAULT_ENTRY_STAGE.to_string(),
            turn_timeout_secs: DEFAULT_TURN_TIMEOUT_SECS,
            stream_chunk_chars: DEFAULT_STREAM_CHUNK_CHARS,
        }
    }
}
