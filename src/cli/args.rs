use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use teller::config::Config;

use super::commands;

/// Entry point for the `teller` command-line interface.
#[derive(Debug, Parser)]
#[command(
    name = "teller",
    about = "Conversational banking assistant",
    version,
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Answer with the built-in keyword responder instead of a model provider
    #[arg(long = "offline", global = true)]
    pub offline: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ask a single question.
    Ask(AskArgs),

    /// Interactive conversation on one session.
    Repl(ReplArgs),

    /// Inspect and manage stored sessions.
    #[command(subcommand)]
    Sessions(SessionsCommand),

    /// Inspect the configured stage chain.
    #[command(subcommand)]
    Stages(StagesCommand),
}

#[derive(Debug, Args)]
pub struct AskArgs {
    /// Session to continue (a new id is generated when omitted).
    #[arg(short = 's', long)]
    pub session: Option<String>,

    /// Customer name used to personalise answers.
    #[arg(long)]
    pub customer_name: Option<String>,

    /// The question.
    #[arg(required = true, trailing_var_arg = true)]
    pub query: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ReplArgs {
    #[arg(short = 's', long)]
    pub session: Option<String>,

    #[arg(long)]
    pub customer_name: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum SessionsCommand {
    /// List stored session ids.
    List,
    /// Show a session's metadata and current state.
    Show {
        session: String,
        /// Also print the stored turns.
        #[arg(long)]
        history: bool,
    },
    /// Delete a session file.
    Delete { session: String },
    /// Reset a session's conversation state, keeping its history.
    Clear { session: String },
}

#[derive(Debug, Subcommand)]
pub enum StagesCommand {
    /// Load and validate the stage descriptors, then print the chain.
    Check,
}

impl Cli {
    pub async fn run(self, config: Config) -> Result<()> {
        commands::run(self, config).await
    }
}
