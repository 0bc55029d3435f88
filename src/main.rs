mod cli;

use anyhow::Result;
use clap::Parser;

use teller::config::{Config, LlmProvider};
use teller::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    telemetry::init(cli.verbose);

    let mut config = Config::load_unvalidated()?;
    if cli.offline {
        config.llm.provider = LlmProvider::Offline;
    }

    cli.run(config).await
}
