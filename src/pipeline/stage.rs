use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{StageError, TurnError};
use crate::retry::{Attempted, RetryError, RetryExecutor};
use crate::state::ConversationState;

use super::context::{ExecutionContext, TurnInput};
use super::descriptor::StageDescriptor;

/// Read-only view a stage gets while it runs.
pub struct StageScope<'a> {
    pub context: &'a ExecutionContext,
    pub cancel: &'a CancellationToken,
}

/// One schema-typed step of the chain.
///
/// The executor validates `input` against the descriptor's input schema before
/// `process` and the returned value against the output schema after it.
#[async_trait]
pub trait Stage: Send + Sync {
    fn descriptor(&self) -> &StageDescriptor;

    fn id(&self) -> &str {
        &self.descriptor().name
    }

    async fn process(&self, input: &Value, scope: &StageScope<'_>) -> Result<Value, StageError>;

    /// Output substituted when the reply is unparseable or retries run out.
    fn default_output(&self, input: &Value, scope: &StageScope<'_>) -> Value;

    /// Input for the successor: the output object plus the carried turn fields.
    fn handoff(&self, output: &Value, turn: &TurnInput) -> Value {
        let mut next = turn.carry();
        if let Some(fields) = output.as_object() {
            for (key, value) in fields {
                next.insert(key.clone(), value.clone());
            }
        }
        Value::Object(next)
    }

    /// Folds this stage's output into the state persisted after the turn.
    fn apply_state(&self, _output: &Value, _state: &mut ConversationState) {}
}

/// How a stage's output was obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum StageRun {
    Completed { output: Value, attempts: u32 },
    ParseFallback { output: Value, error: String },
    Degraded { output: Value, attempts: u32, error: String },
}

impl StageRun {
    pub fn output(&self) -> &Value {
        match self {
            StageRun::Completed { output, .. }
            | StageRun::ParseFallback { output, .. }
            | StageRun::Degraded { output, .. } => output,
        }
    }

    pub fn into_output(self) -> Value {
        match self {
            StageRun::Completed { output, .. }
            | StageRun::ParseFallback { output, .. }
            | StageRun::Degraded { output, .. } => output,
        }
    }
}

/// Validate, process, validate; retried per the descriptor's policy.
///
/// Only cancellation escapes as an error: every stage failure ends in either
/// the real output or the stage's default output.
pub async fn run_stage(
    stage: &dyn Stage,
    input: &Value,
    scope: &StageScope<'_>,
) -> Result<StageRun, TurnError> {
    let descriptor = stage.descriptor();
    let executor = RetryExecutor::new(descriptor.retry_policy());

    let result = executor
        .execute(scope.cancel, |attempt| {
            debug!(stage = stage.id(), attempt, "running stage attempt");
            attempt_once(stage, input, scope)
        })
        .await;

    match result {
        Ok(Attempted {
            value: Ok(output),
            attempts,
        }) => Ok(StageRun::Completed { output, attempts }),
        Ok(Attempted {
            value: Err(StageError::Cancelled),
            ..
        })
        | Err(RetryError::Cancelled) => Err(TurnError::Cancelled),
        Ok(Attempted {
            value: Err(error), ..
        }) => {
            warn!(stage = stage.id(), error = %error, "stage reply unusable, using default output");
            Ok(StageRun::ParseFallback {
                output: stage.default_output(input, scope),
                error: error.to_string(),
            })
        }
        Err(RetryError::Exhausted { attempts, last }) => {
            warn!(stage = stage.id(), attempts, error = %last, "stage degraded after exhausting retries");
            Ok(StageRun::Degraded {
                output: stage.default_output(input, scope),
                attempts,
                error: last.to_string(),
            })
        }
    }
}

/// Outer `Err` is retried; an inner `Err` is a failure that retrying cannot fix.
async fn attempt_once(
    stage: &dyn Stage,
    input: &Value,
    scope: &StageScope<'_>,
) -> Result<Result<Value, StageError>, StageError> {
    let descriptor = stage.descriptor();
    descriptor.input_schema.validate(input, "input")?;

    match stage.process(input, scope).await {
        Ok(output) => {
            descriptor.output_schema.validate(&output, "output")?;
            Ok(Ok(output))
        }
        Err(error) if !error.is_retryable() => Ok(Err(error)),
        Err(error) => Err(error),
    }
}
