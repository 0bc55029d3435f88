use std::fmt;

use serde_json::{Map, Value, json};

use crate::error::TurnError;
use crate::session::{ConversationTurn, CustomerInfo};
use crate::state::{ConversationState, context_entries};

/// What the user asked this turn, plus the context every stage input carries.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnInput {
    pub query: String,
    /// Digest of recent turns, see [`crate::state::context_entries`].
    pub conversation_context: Value,
    pub current_state: ConversationState,
    pub customer_info: CustomerInfo,
}

impl TurnInput {
    pub fn new(query: impl Into<String>, context: &ExecutionContext) -> Self {
        Self {
            query: query.into(),
            conversation_context: context.conversation_context(),
            current_state: context.state.clone(),
            customer_info: context.customer.clone(),
        }
    }

    /// Input of the entry stage.
    pub fn entry_input(&self) -> Value {
        let mut input = self.carry();
        input.insert("query".into(), Value::String(self.query.clone()));
        Value::Object(input)
    }

    /// Fields handed to every stage unchanged.
    pub fn carry(&self) -> Map<String, Value> {
        let mut carried = Map::new();
        carried.insert(
            "conversation_context".into(),
            self.conversation_context.clone(),
        );
        carried.insert(
            "current_state".into(),
            serde_json::to_value(&self.current_state).unwrap_or_else(|_| json!({})),
        );
        carried.insert(
            "customer_info".into(),
            Value::Object(self.customer_info.clone()),
        );
        carried
    }
}

/// Per-turn working set. Owned by exactly one in-flight turn.
pub struct ExecutionContext {
    pub session_id: String,
    /// 1 for the first turn of a session.
    pub turn_depth: u64,
    /// Recent turns, oldest first.
    pub history: Vec<ConversationTurn>,
    /// State the turn started from. Read-only while stages run.
    pub state: ConversationState,
    pub customer: CustomerInfo,
    stage_results: Vec<(String, Value)>,
    events: Vec<PipelineEvent>,
    trace: Vec<String>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("session_id", &self.session_id)
            .field("turn_depth", &self.turn_depth)
            .field("history_len", &self.history.len())
            .field("state", &self.state)
            .field("stage_results", &self.stage_results)
            .field("events", &self.events)
            .finish()
    }
}

impl ExecutionContext {
    pub fn new(
        session_id: impl Into<String>,
        turn_depth: u64,
        history: Vec<ConversationTurn>,
        state: ConversationState,
        customer: CustomerInfo,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            turn_depth,
            history,
            state,
            customer,
            stage_results: Vec::new(),
            events: Vec::new(),
            trace: Vec::new(),
        }
    }

    pub fn conversation_context(&self) -> Value {
        context_entries(&self.history)
    }

    pub fn stage_result(&self, stage: &str) -> Option<&Value> {
        self.stage_results
            .iter()
            .find(|(id, _)| id == stage)
            .map(|(_, output)| output)
    }

    /// Outputs in execution order.
    pub fn stage_results(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.stage_results
            .iter()
            .map(|(id, output)| (id.as_str(), output))
    }

    pub fn stages_run(&self) -> Vec<String> {
        self.stage_results.iter().map(|(id, _)| id.clone()).collect()
    }

    /// A stage may contribute at most one result per turn.
    pub fn record_stage_result(&mut self, stage: &str, output: Value) -> Result<(), TurnError> {
        if self.stage_result(stage).is_some() {
            return Err(TurnError::Pipeline(format!(
                "stage `{stage}` ran twice in one turn"
            )));
        }
        self.stage_results.push((stage.to_string(), output));
        Ok(())
    }

    pub fn record_event(&mut self, event: PipelineEvent) {
        self.events.push(event);
    }

    pub fn record_stage_start(&mut self, stage: &str) {
        self.record_event(PipelineEvent::StageStarted(stage.to_string()));
    }

    pub fn record_stage_end(&mut self, stage: &str, attempts: u32) {
        self.record_event(PipelineEvent::StageCompleted {
            stage: stage.to_string(),
            attempts,
        });
    }

    pub fn record_stage_fallback(&mut self, stage: &str, error: impl Into<String>) {
        self.record_event(PipelineEvent::StageFellBack {
            stage: stage.to_string(),
            error: error.into(),
        });
    }

    pub fn record_stage_degraded(&mut self, stage: &str, attempts: u32, error: impl Into<String>) {
        self.record_event(PipelineEvent::StageDegraded {
            stage: stage.to_string(),
            attempts,
            error: error.into(),
        });
    }

    pub fn record_route(&mut self, from: &str, to: &str) {
        self.record_event(PipelineEvent::Routed {
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    pub fn record_termination(&mut self, stage: &str, rule_index: Option<usize>) {
        self.record_event(PipelineEvent::Terminated {
            stage: stage.to_string(),
            rule_index,
        });
    }

    pub fn events(&self) -> &[PipelineEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<PipelineEvent> {
        std::mem::take(&mut self.events)
    }

    /// Adds a `"<Label> Agent Input|Output: {json}"` line to the trace record.
    pub fn record_trace(&mut self, label: &str, section: TraceSection, value: &Value) {
        let section = match section {
            TraceSection::Input => "Input",
            TraceSection::Output => "Output",
        };
        self.trace.push(format!("{label} Agent {section}: {value}"));
    }

    pub fn trace_text(&self) -> String {
        let mut text = self.trace.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceSection {
    Input,
    Output,
}

/// Audit events recorded while a turn walks the chain.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StageStarted(String),
    StageCompleted { stage: String, attempts: u32 },
    /// Unparseable reply; the stage's default output was used without retrying.
    StageFellBack { stage: String, error: String },
    /// Retries exhausted; the stage's default output was used.
    StageDegraded { stage: String, attempts: u32, error: String },
    Routed { from: String, to: String },
    /// Chain ended at `stage`, by a conditional rule when `rule_index` is set.
    Terminated { stage: String, rule_index: Option<usize> },
}
