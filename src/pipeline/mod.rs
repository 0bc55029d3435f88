//! The orchestration core.
//!
//! Stages are declared by [`StageDescriptor`]s and linked into a linear chain
//! by a [`RoutingTable`] that is validated before the first turn runs. A turn
//! walks the chain from the entry stage; each stage runs its
//! validate-process-validate cycle under a retry policy, and a stage that keeps
//! failing contributes its default output instead of aborting the turn.

pub mod catalog;
pub mod context;
pub mod descriptor;
pub mod orchestrator;
pub mod outcome;
pub mod prompt;
pub mod routing;
pub mod stage;
pub mod stages;

pub use catalog::{STAGE_KINDS, build_pipeline, build_stage, builtin_descriptors};
pub use context::{ExecutionContext, PipelineEvent, TraceSection, TurnInput};
pub use descriptor::{ConditionalRule, RuleAction, StageDescriptor, load_descriptors, parse_descriptor};
pub use orchestrator::{Pipeline, PipelineBuilder, PipelineOrchestrator};
pub use outcome::{ChainOutcome, TurnReport, TurnRequest};
pub use routing::{Route, RoutingTable};
pub use stage::{Stage, StageRun, StageScope, run_stage};
pub use stages::{DomainStage, PreprocessingStage, RewritingStage, StageDeps, SupervisorStage};

#[cfg(test)]
mod tests;
