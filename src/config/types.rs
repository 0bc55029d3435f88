use anyhow::anyhow;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::constants::{
    DEFAULT_DEEPINFRA_BASE_URL, DEFAULT_DEEPINFRA_MODEL, DEFAULT_OPENAI_BASE_URL,
    DEFAULT_OPENAI_MODEL,
};

#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmSettings,
    pub session: SessionSettings,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub api_key: String,
    pub timeout_secs: u64,
    pub base_url: String,
    pub user_agent: String,
    pub model: String,
    pub temperature: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "deepinfra")]
    DeepInfra,
    /// Deterministic in-process responder; no network, no key.
    Offline,
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmProvider::OpenAi => write!(f, "openai"),
            LlmProvider::DeepInfra => write!(f, "deepinfra"),
            LlmProvider::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(LlmProvider::OpenAi),
            "deepinfra" => Ok(LlmProvider::DeepInfra),
            "offline" => Ok(LlmProvider::Offline),
            other => Err(anyhow!("Unknown LLM provider '{other}'")),
        }
    }
}

impl LlmProvider {
    pub fn default_base_url(self) -> &'static str {
        match self {
            LlmProvider::OpenAi | LlmProvider::Offline => DEFAULT_OPENAI_BASE_URL,
            LlmProvider::DeepInfra => DEFAULT_DEEPINFRA_BASE_URL,
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            LlmProvider::OpenAi | LlmProvider::Offline => DEFAULT_OPENAI_MODEL,
            LlmProvider::DeepInfra => DEFAULT_DEEPINFRA_MODEL,
        }
    }

    pub fn api_key_env_var(self) -> Option<&'static str> {
        match self {
            LlmProvider::OpenAi => Some("OPENAI_API_KEY"),
            LlmProvider::DeepInfra => Some("DEEPINFRA_API_KEY"),
            LlmProvider::Offline => None,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "OpenAI",
            LlmProvider::DeepInfra => "DeepInfra",
            LlmProvider::Offline => "Offline",
        }
    }

    pub fn requires_api_key(self) -> bool {
        self.api_key_env_var().is_some()
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub dir: PathBuf,
    /// Turns retained per session record.
    pub max_history: usize,
    /// Turns loaded into the execution context of a new turn.
    pub history_window: usize,
    pub compaction_soft_limit_bytes: u64,
    pub compaction_hard_limit_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Directory of `*.json` stage descriptors; the built-in catalog when unset.
    pub stages_dir: Option<PathBuf>,
    pub entry_stage: String,
    pub turn_timeout_secs: u64,
    pub stream_chunk_chars: usize,
}

impl PipelineSettings {
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }
}

// File configuration types
#[derive(Debug, Default, Deserialize)]
pub(super) struct FileConfig {
    #[serde(default)]
    pub llm: Option<FileLlmSettings>,
    #[serde(default)]
    pub session: Option<FileSessionSettings>,
    #[serde(default)]
    pub pipeline: Option<FilePipelineSettings>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct FileLlmSettings {
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: Option<u64>,
    pub base_url: Option<String>,
    pub user_agent: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct FileSessionSettings {
    pub dir: Option<PathBuf>,
    pub max_history: Option<usize>,
    pub history_window: Option<usize>,
    pub compaction_soft_limit_bytes: Option<u64>,
    pub compaction_hard_limit_bytes: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct FilePipelineSettings {
    pub stages_dir: Option<PathBuf>,
    pub entry_stage: Option<String>,
    pub turn_timeout_secs: Option<u64>,
    pub stream_chunk_chars: Option<usize>,
}

// Serialization helpers
#[derive(Serialize)]
pub(super) struct PersistedConfig<'a> {
    pub llm: PersistedLlm<'a>,
    pub session: PersistedSession<'a>,
    pub pipeline: PersistedPipeline<'a>,
}

#[derive(Serialize)]
pub(super) struct PersistedLlm<'a> {
    pub provider: LlmProvider,
    pub api_key: &'a str,
    pub timeout_secs: u64,
    pub base_url: &'a str,
    pub user_agent: &'a str,
    pub model: &'a str,
    pub temperature: f32,
}

#[derive(Serialize)]
pub(super) struct PersistedSession<'a> {
    pub dir: &'a PathBuf,
    pub max_history: usize,
    pub history_window: usize,
    pub compaction_soft_limit_bytes: u64,
    pub compaction_hard_limit_bytes: u64,
}

#[derive(Serialize)]
pub(super) struct PersistedPipeline<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stages_dir: Option<&'a PathBuf>,
    pub entry_stage: &'a str,
    pub turn_timeout_secs: u64,
    pub stream_chunk_chars: usize,
}

impl<'a> From<&'a Config> for PersistedConfig<'a> {
    fn from(config: &'a Config) -> Self {
        PersistedConfig {
            llm: PersistedLlm {
                provider: config.llm.provider,
                api_key: &config.llm.api_key,
                timeout_secs: config.llm.timeout_secs,
                base_url: &config.llm.base_url,
                user_agent: &config.llm.user_agent,
                model: &config.llm.model,
                temperature: config.llm.temperature,
            },
            session: PersistedSession {
                dir: &config.session.dir,
                max_history: config.session.max_history,
                history_window: config.session.history_window,
                compaction_soft_limit_bytes: config.session.compaction_soft_limit_bytes,
                compaction_hard_limit_bytes: config.session.compaction_hard_limit_bytes,
            },
            pipeline: PersistedPipeline {
                stages_dir: config.pipeline.stages_dir.as_ref(),
                entry_stage: &config.pipeline.entry_stage,
                turn_timeout_secs: config.pipeline.turn_timeout_secs,
                stream_chunk_chars: config.pipeline.stream_chunk_chars,
            },
        }
    }
}
