use crate::response::FinalPayload;
use crate::session::CustomerInfo;
use crate::state::ConversationState;

use super::context::PipelineEvent;

/// One user utterance addressed to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRequest {
    pub session_id: String,
    pub query: String,
    /// Replaces the stored customer info for this turn when set.
    pub customer: Option<CustomerInfo>,
}

impl TurnRequest {
    pub fn new(session_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            query: query.into(),
            customer: None,
        }
    }

    pub fn with_customer(mut self, customer: CustomerInfo) -> Self {
        self.customer = Some(customer);
        self
    }
}

/// How the chain walk ended.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutcome {
    pub payload: FinalPayload,
    pub final_stage: String,
    /// Set when a conditional rule cut the chain short.
    pub terminated_by_rule: bool,
}

/// Everything a caller may want to know about a completed turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub session_id: String,
    pub turn_depth: u64,
    pub response_text: String,
    pub payload: FinalPayload,
    /// State persisted with the turn.
    pub state: ConversationState,
    pub stages_run: Vec<String>,
    pub terminated_by_rule: bool,
    pub events: Vec<PipelineEvent>,
}

impl TurnReport {
    /// Whether any stage ran on its default output.
    pub fn degraded(&self) -> bool {
        self.events.iter().any(|event| {
            matches!(
                event,
                PipelineEvent::StageDegraded { .. } | PipelineEvent::StageFellBack { .. }
            )
        })
    }
}
