//! Configuration for the assistant.
//!
//! Settings come from built-in defaults, then `~/.teller/config` (JSON), then
//! `TELLER_*` environment variables. The result is validated before use.

mod builder;
mod constants;
mod defaults;
mod environment;
mod loader;
mod types;
mod validation;

pub use builder::ConfigBuilder;
pub use constants::{
    DEFAULT_COMPACTION_HARD_LIMIT_BYTES, DEFAULT_COMPACTION_SOFT_LIMIT_BYTES,
    DEFAULT_DEEPINFRA_BASE_URL, DEFAULT_ENTRY_STAGE, DEFAULT_HISTORY_WINDOW, DEFAULT_MAX_HISTORY,
    DEFAULT_OPENAI_BASE_URL, DEFAULT_STREAM_CHUNK_CHARS, DEFAULT_TURN_TIMEOUT_SECS,
};
pub use types::{Config, LlmProvider, LlmSettings, PipelineSettings, SessionSettings};

#[cfg(test)]
mod tests;
