//! Error taxonomy for the orchestration core.
//!
//! Stage-level failures are values, not panics: the orchestrator decides per kind
//! whether to retry, substitute a default output, or abort the turn.

use std::time::Duration;

use thiserror::Error;

use crate::schema::SchemaViolation;

/// Failure reported by the external reasoning service.
#[derive(Debug, Error)]
pub enum ReasoningError {
    #[error("reasoning service returned an empty result")]
    Empty,

    #[error("reasoning service request failed: {0}")]
    Transport(String),

    #[error("reasoning service error (status {status}): {message}")]
    Status { status: u16, message: String },
}

/// Failure of a single stage attempt.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("schema validation failed: {0}")]
    Schema(#[from] SchemaViolation),

    #[error("reasoning service returned no usable text")]
    EmptyReasoningResult,

    #[error("reasoning service call failed: {0}")]
    Reasoning(String),

    #[error("could not parse stage response: {0}")]
    ResponseParse(String),

    #[error("tool `{tool}` failed: {message}")]
    Tool { tool: String, message: String },

    #[error("stage execution cancelled")]
    Cancelled,
}

impl StageError {
    /// Whether another attempt against the reasoning service could succeed.
    /// Unparseable responses degrade immediately instead.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StageError::ResponseParse(_) | StageError::Cancelled)
    }
}

impl From<ReasoningError> for StageError {
    fn from(error: ReasoningError) -> Self {
        match error {
            ReasoningError::Empty => StageError::EmptyReasoningResult,
            other => StageError::Reasoning(other.to_string()),
        }
    }
}

/// Malformed stage configuration. Always fatal at load time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingConfigError {
    #[error("failed to load stage descriptor {path}: {reason}")]
    Descriptor { path: String, reason: String },

    #[error("duplicate stage id `{0}`")]
    DuplicateStage(String),

    #[error("stage `{stage}` names unknown successor `{successor}`")]
    UnknownSuccessor { stage: String, successor: String },

    #[error("entry stage `{0}` is not configured")]
    UnknownEntry(String),

    #[error("stage chain contains a cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("stage `{stage}` uses unknown stage kind `{kind}`")]
    UnknownKind { stage: String, kind: String },

    #[error("stage `{stage}` has an invalid conditional rule: {reason}")]
    InvalidRule { stage: String, reason: String },

    #[error("stage `{stage}` has an invalid retry policy: {reason}")]
    InvalidRetry { stage: String, reason: String },

    #[error("stage `{stage}` has invalid settings: {reason}")]
    InvalidSettings { stage: String, reason: String },

    #[error("no stages configured")]
    Empty,
}

/// Session persistence failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session `{0}` not found")]
    NotFound(String),

    #[error("invalid session id `{0}`")]
    InvalidId(String),

    #[error("session storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("session record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Orchestrator-level failure that aborts a turn.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("session store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("pipeline invariant violated: {0}")]
    Pipeline(String),

    #[error("turn exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("turn cancelled")]
    Cancelled,
}
