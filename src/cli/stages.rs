use anyhow::{Context, Result};
use colored::Colorize;

use teller::config::Config;
use teller::error::RoutingConfigError;
use teller::pipeline::{
    RoutingTable, STAGE_KINDS, StageDescriptor, builtin_descriptors, load_descriptors,
};

use super::args::StagesCommand;

pub(crate) fn handle_stages(command: StagesCommand, config: &Config) -> Result<()> {
    match command {
        StagesCommand::Check => check(config),
    }
}

fn check(config: &Config) -> Result<()> {
    let (source, descriptors) = match &config.pipeline.stages_dir {
        Some(dir) => (
            dir.display().to_string(),
            load_descriptors(dir).context("Failed to load stage descriptors")?,
        ),
        None => (
            "built-in".to_string(),
            builtin_descriptors().context("Built-in stage descriptors are invalid")?,
        ),
    };

    check_kinds(&descriptors)?;
    let table = RoutingTable::build(&descriptors, &config.pipeline.entry_stage)
        .context("Invalid stage chain")?;

    println!("✅ {} stage descriptors ({source})", descriptors.len());
    for (index, id) in table.chain().iter().enumerate() {
        let Some(descriptor) = descriptors.iter().find(|d| &d.name == id) else {
            continue;
        };
        println!(
            "   {}. {} [{}] retry {}x, {} rule(s)",
            index + 1,
            id.cyan(),
            descriptor.kind(),
            descriptor.retry.max_attempts,
            descriptor.conditional_rules.len()
        );
    }

    let reachable = table.chain();
    for descriptor in descriptors.iter().filter(|d| !reachable.contains(&d.name)) {
        println!(
            "   {} {} is not reachable from `{}`",
            "⚠️".yellow(),
            descriptor.name.yellow(),
            table.entry()
        );
    }
    Ok(())
}

fn check_kinds(descriptors: &[StageDescriptor]) -> Result<(), RoutingConfigError> {
    match descriptors
        .iter()
        .find(|descriptor| !STAGE_KINDS.contains(&descriptor.kind()))
    {
        Some(descriptor) => Err(RoutingConfigError::UnknownKind {
            stage: descriptor.name.clone(),
            kind: descriptor.kind().to_string(),
        }),
        None => Ok(()),
    }
}
