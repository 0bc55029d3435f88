use anyhow::Result;

use super::types::{Config, LlmSettings, PipelineSettings, SessionSettings};

#[derive(Debug)]
pub struct ConfigBuilder {
    pub(super) llm: LlmSettings,
    pub(super) session: SessionSettings,
    pub(super) pipeline: PipelineSettings,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            llm: LlmSettings::default(),
            session: SessionSettings::default(),
            pipeline: PipelineSettings::default(),
        }
    }

    pub fn with_llm<F>(mut self, update: F) -> Self
    where
        F: FnOnce(&mut LlmSettings),
    {
        update(&mut self.llm);
        self
    }

    pub fn with_session<F>(mut self, update: F) -> Self
    where
        F: FnOnce(&mut SessionSettings),
    {
        update(&mut self.session);
        self
    }

    pub fn with_pipeline<F>(mut self, update: F) -> Self
    where
        F: FnOnce(&mut PipelineSettings),
    {
        update(&mut self.pipeline);
        self
    }

    pub fn build(self) -> Result<Config> {
        Ok(Config {
            llm: self.llm,
            session: self.session,
            pipeline: self.pipeline,
        })
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
