//! Built-in stage descriptors and descriptor-to-stage instantiation.

use std::sync::Arc;

use crate::error::RoutingConfigError;

use super::descriptor::{StageDescriptor, parse_descriptor};
use super::orchestrator::Pipeline;
use super::stage::Stage;
use super::stages::{DomainStage, PreprocessingStage, RewritingStage, StageDeps, SupervisorStage};

const BUILTIN_SOURCES: &[(&str, &str)] = &[
    ("stages/rewriting.json", include_str!("../../stages/rewriting.json")),
    ("stages/preprocessing.json", include_str!("../../stages/preprocessing.json")),
    ("stages/supervisor.json", include_str!("../../stages/supervisor.json")),
    ("stages/domain.json", include_str!("../../stages/domain.json")),
];

pub const STAGE_KINDS: &[&str] = &["rewriting", "preprocessing", "supervisor", "domain"];

/// Settings that must be JSON objects when present.
const OBJECT_SETTINGS: &[&str] = &[
    "topics",
    "intents",
    "domains",
    "tools",
    "intent_domain_mapping",
    "intent_tool_mapping",
    "required_slots",
];

/// Descriptors compiled into the binary.
pub fn builtin_descriptors() -> Result<Vec<StageDescriptor>, RoutingConfigError> {
    BUILTIN_SOURCES
        .iter()
        .map(|(origin, source)| parse_descriptor(source, origin))
        .collect()
}

pub fn build_stage(
    descriptor: StageDescriptor,
    deps: &StageDeps,
) -> Result<Arc<dyn Stage>, RoutingConfigError> {
    check_settings(&descriptor)?;

    let client = Arc::clone(&deps.client);
    let kind = descriptor.kind().to_string();
    let stage: Arc<dyn Stage> = match kind.as_str() {
        "rewriting" => Arc::new(RewritingStage::new(descriptor, client)),
        "preprocessing" => Arc::new(PreprocessingStage::new(descriptor, client)),
        "supervisor" => Arc::new(SupervisorStage::new(descriptor, client)),
        "domain" => Arc::new(DomainStage::new(descriptor, client, Arc::clone(&deps.tools))),
        other => {
            return Err(RoutingConfigError::UnknownKind {
                stage: descriptor.name.clone(),
                kind: other.to_string(),
            });
        }
    };
    Ok(stage)
}

/// Instantiates every descriptor and validates the chain starting at `entry`.
pub fn build_pipeline(
    descriptors: Vec<StageDescriptor>,
    entry: &str,
    deps: &StageDeps,
) -> Result<Pipeline, RoutingConfigError> {
    let stages = descriptors
        .into_iter()
        .map(|descriptor| build_stage(descriptor, deps))
        .collect::<Result<Vec<_>, _>>()?;
    Pipeline::new(stages, entry)
}

fn check_settings(descriptor: &StageDescriptor) -> Result<(), RoutingConfigError> {
    for key in OBJECT_SETTINGS {
        if let Some(value) = descriptor.settings.get(*key) {
            if !value.is_object() {
                return Err(RoutingConfigError::InvalidSettings {
                    stage: descriptor.name.clone(),
                    reason: format!("`{key}` must be an object"),
                });
            }
        }
    }
    Ok(())
}
