use anyhow::{Result, anyhow, bail};

use super::types::Config;

pub fn validate(config: &Config) -> Result<()> {
    let provider = config.llm.provider;
    if let Some(env_var) = provider.api_key_env_var() {
        if config.llm.api_key.trim().is_empty() {
            return Err(anyhow!(
                "{} API key not found. Set {} or add it to {}",
                provider.display_name(),
                env_var,
                Config::config_path()?.display()
            ));
        }
    }

    if config.session.max_history == 0 {
        bail!("session.max_history must be at least 1");
    }
    if config.session.history_window == 0 {
        bail!("session.history_window must be at least 1");
    }
    if config.session.compaction_soft_limit_bytes > config.session.compaction_hard_limit_bytes {
        bail!("session compaction soft limit exceeds the hard limit");
    }
    if config.pipeline.turn_timeout_secs == 0 {
        bail!("pipeline.turn_timeout_secs must be at least 1");
    }
    if config.pipeline.stream_chunk_chars == 0 {
        bail!("pipeline.stream_chunk_chars must be at least 1");
    }
    if config.pipeline.entry_stage.trim().is_empty() {
        bail!("pipeline.entry_stage must name a stage");
    }

    Ok(())
}
