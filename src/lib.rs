//! Multi-stage conversational banking assistant.
//!
//! A user utterance flows through a configured chain of reasoning stages
//! (rewriting, preprocessing, supervision, domain execution). Each stage
//! validates its input and output against a declarative schema, retries
//! transient reasoning failures with backoff, and degrades to a default output
//! instead of failing the turn. Structured conversation state is snapshotted
//! per turn and carried into the next one.

pub mod client;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod response;
pub mod retry;
pub mod schema;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod tools;

pub use error::{ReasoningError, RoutingConfigError, StageError, StoreError, TurnError};
pub use pipeline::{PipelineOrchestrator, TurnReport, TurnRequest};
pub use response::{ResponseEvent, ResponseStream};
