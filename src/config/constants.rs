pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_DEEPINFRA_BASE_URL: &str = "https://api.deepinfra.com/v1/openai";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4";
pub const DEFAULT_DEEPINFRA_MODEL: &str = "meta-llama/Meta-Llama-3.1-70B-Instruct";

pub const DEFAULT_SESSION_DIR: &str = ".teller/sessions";
pub const DEFAULT_MAX_HISTORY: usize = 100;
pub const DEFAULT_HISTORY_WINDOW: usize = 10;
pub const DEFAULT_COMPACTION_SOFT_LIMIT_BYTES: u64 = 5 * 1024 * 1024;
pub const DEFAULT_COMPACTION_HARD_LIMIT_BYTES: u64 = 10 * 1024 * 1024;

pub const DEFAULT_ENTRY_STAGE: &str = "rewriting";
pub const DEFAULT_TURN_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_STREAM_CHUNK_CHARS: usize = 16;
