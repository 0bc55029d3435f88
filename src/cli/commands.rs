use std::sync::Arc;

use anyhow::Result;

use teller::client::build_client;
use teller::config::Config;
use teller::pipeline::PipelineOrchestrator;
use teller::tools::StaticToolExecutor;

use super::args::{Cli, Command};
use super::conversation;
use super::sessions;
use super::stages;

pub(crate) async fn run(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Command::Ask(args) => {
            let orchestrator = build_orchestrator(&config)?;
            conversation::handle_ask(args, orchestrator).await
        }
        Command::Repl(args) => {
            let orchestrator = build_orchestrator(&config)?;
            conversation::handle_repl(args, orchestrator).await
        }
        Command::Sessions(command) => sessions::handle_sessions(command, &config).await,
        Command::Stages(command) => stages::handle_stages(command, &config),
    }
}

/// Provider settings are only validated for commands that talk to a model.
fn build_orchestrator(config: &Config) -> Result<Arc<PipelineOrchestrator>> {
    config.validate()?;
    let client = build_client(&config.llm)?;
    let tools = Arc::new(StaticToolExecutor::builtin());
    let orchestrator = PipelineOrchestrator::from_config(config, client, tools)?;
    Ok(Arc::new(orchestrator))
}
