use anyhow::{Context, Result};
use dirs::home_dir;
use std::{fs, path::Path};

use super::Config;
use super::builder::ConfigBuilder;
use super::environment::apply_env_overrides;
use super::types::{FileConfig, LlmProvider, PersistedConfig};
use super::validation::validate;

impl Config {
    pub fn config_path() -> Result<std::path::PathBuf> {
        let mut path = home_dir().context("Could not determine home directory")?;
        path.push(".teller/config");
        Ok(path)
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn load() -> Result<Self> {
        let config = Self::load_unvalidated()?;
        validate(&config)?;
        Ok(config)
    }

    /// Defaults, file, then environment, without validation. Lets callers
    /// adjust the result (for example forcing the offline provider) first.
    pub fn load_unvalidated() -> Result<Self> {
        let path = Self::config_path()?;
        let mut builder = ConfigBuilder::new();

        if path.exists() {
            builder = Self::apply_file(builder, &path)?;
        }

        builder = apply_env_overrides(builder)?;
        builder.build()
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Unable to create config directory {}", parent.display())
            })?;
        }

        let payload = PersistedConfig::from(self);
        let json = serde_json::to_string_pretty(&payload)
            .context("Failed to serialize configuration to JSON")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        validate(self)
    }

    fn apply_file(builder: ConfigBuilder, path: &Path) -> Result<ConfigBuilder> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed reading config at {}", path.display()))?;

        if contents.trim().is_empty() {
            return Ok(builder);
        }

        let raw: FileConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed parsing JSON config at {}", path.display()))?;

        raw.apply(builder)
    }
}

impl FileConfig {
    fn apply(self, builder: ConfigBuilder) -> Result<ConfigBuilder> {
        let mut builder = builder;

        if let Some(llm_file) = self.llm {
            let provider = match llm_file.provider.as_deref() {
                Some(raw) => Some(raw.parse::<LlmProvider>()?),
                None => None,
            };
            builder = builder.with_llm(|llm| {
                if let Some(parsed) = provider {
                    if llm.provider != parsed {
                        llm.provider = parsed;
                        llm.base_url = parsed.default_base_url().to_string();
                        llm.model = parsed.default_model().to_string();
                    }
                }
                if let Some(api_key) = llm_file.api_key {
                    llm.api_key = api_key;
                }
                if let Some(timeout) = llm_file.timeout_secs {
                    llm.timeout_secs = timeout;
                }
                if let Some(base_url) = llm_file.base_url {
                    llm.base_url = base_url;
                }
                if let Some(user_agent) = llm_file.user_agent {
                    llm.user_agent = user_agent;
                }
                if let Some(model) = llm_file.model {
                    llm.model = model;
                }
                if let Some(temperature) = llm_file.temperature {
                    llm.temperature = temperature;
                }
            });
        }

        if let Some(session_file) = self.session {
            builder = builder.with_session(|session| {
                if let Some(dir) = session_file.dir {
                    session.dir = dir;
                }
                if let Some(max_history) = session_file.max_history {
                    session.max_history = max_history;
                }
                if let Some(window) = session_file.history_window {
                    session.history_window = window;
                }
                if let Some(soft) = session_file.compaction_soft_limit_bytes {
                    session.compaction_soft_limit_bytes = soft;
                }
                if let Some(hard) = session_file.compaction_hard_limit_bytes {
                    session.compaction_hard_limit_bytes = hard;
                }
            });
        }

        if let Some(pipeline_file) = self.pipeline {
            builder = builder.with_pipeline(|pipeline| {
                if let Some(dir) = pipeline_file.stages_dir {
                    pipeline.stages_dir = Some(dir);
                }
                if let Some(entry) = pipeline_file.entry_stage {
                    pipeline.entry_stage = entry;
                }
                if let Some(timeout) = pipeline_file.turn_timeout_secs {
                    pipeline.turn_timeout_secs = timeout;
                }
                if let Some(chunk) = pipeline_file.stream_chunk_chars {
                    pipeline.stream_chunk_chars = chunk;
                }
            });
        }

        Ok(builder)
    }
}
