use anyhow::{Context, Result, anyhow};
use std::env;
use std::path::PathBuf;

use super::builder::ConfigBuilder;
use super::types::LlmProvider;

pub fn apply_env_overrides(mut builder: ConfigBuilder) -> Result<ConfigBuilder> {
    if let Some(provider_raw) = env_string("TELLER_PROVIDER")? {
        let provider = provider_raw
            .parse::<LlmProvider>()
            .with_context(|| format!("Failed to parse TELLER_PROVIDER value '{provider_raw}'"))?;
        builder = builder.with_llm(|llm| {
            if llm.provider != provider {
                llm.provider = provider;
                llm.base_url = provider.default_base_url().to_string();
                llm.model = provider.default_model().to_string();
            }
        });
    }

    if let Some(base_url) = env_string("TELLER_LLM_BASE_URL")? {
        builder = builder.with_llm(|llm| llm.base_url = base_url);
    }

    if let Some(api_key) = env_string("OPENAI_API_KEY")? {
        builder = builder.with_llm(|llm| {
            if llm.provider == LlmProvider::OpenAi {
                llm.api_key = api_key;
            }
        });
    }

    if let Some(api_key) = env_string("DEEPINFRA_API_KEY")? {
        builder = builder.with_llm(|llm| {
            if llm.provider == LlmProvider::DeepInfra {
                llm.api_key = api_key;
            }
        });
    }

    if let Some(api_key) = env_string("TELLER_API_KEY")? {
        builder = builder.with_llm(|llm| llm.api_key = api_key);
    }

    if let Some(model) = env_string("TELLER_MODEL")? {
        builder = builder.with_llm(|llm| llm.model = model);
    }

    if let Some(timeout) = env_u64("TELLER_TIMEOUT_SECS")? {
        builder = builder.with_llm(|llm| llm.timeout_secs = timeout);
    }

    if let Some(dir) = env_string("TELLER_SESSION_DIR")? {
        builder = builder.with_session(|session| session.dir = PathBuf::from(dir));
    }

    if let Some(max_history) = env_u64("TELLER_MAX_HISTORY")? {
        builder = builder.with_session(|session| session.max_history = max_history as usize);
    }

    if let Some(dir) = env_string("TELLER_STAGES_DIR")? {
        builder = builder.with_pipeline(|pipeline| pipeline.stages_dir = Some(PathBuf::from(dir)));
    }

    if let Some(timeout) = env_u64("TELLER_TURN_TIMEOUT_SECS")? {
        builder = builder.with_pipeline(|pipeline| pipeline.turn_timeout_secs = timeout);
    }

    if let Some(chunk) = env_u32("TELLER_STREAM_CHUNK_CHARS")? {
        builder = builder.with_pipeline(|pipeline| pipeline.stream_chunk_chars = chunk as usize);
    }

    Ok(builder)
}

pub fn env_string(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(val) => Ok(Some(val)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(anyhow!("{key} contains invalid UTF-8")),
    }
}

pub fn env_u64(key: &str) -> Result<Option<u64>> {
    if let Some(value) = env_string(key)? {
        let parsed = value
            .parse::<u64>()
            .with_context(|| format!("Failed to parse {key} as u64"))?;
        Ok(Some(parsed))
    } else {
        Ok(None)
    }
}

pub fn env_u32(key: &str) -> Result<Option<u32>> {
    if let Some(value) = env_string(key)? {
        let parsed = value
            .parse::<u32>()
            .with_context(|| format!("Failed to parse {key} as u32"))?;
        Ok(Some(parsed))
    } else {
        Ok(None)
    }
}
