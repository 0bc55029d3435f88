use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use futures_util::stream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::DynReasoningClient;
use crate::config::{
    Config, DEFAULT_COMPACTION_HARD_LIMIT_BYTES, DEFAULT_COMPACTION_SOFT_LIMIT_BYTES,
    DEFAULT_ENTRY_STAGE, DEFAULT_HISTORY_WINDOW, DEFAULT_MAX_HISTORY, DEFAULT_STREAM_CHUNK_CHARS,
    DEFAULT_TURN_TIMEOUT_SECS,
};
use crate::error::{RoutingConfigError, TurnError};
use crate::response::{
    FinalPayload, ResponseRenderer, ResponseStream, TURN_CANCELLED_MESSAGE, TURN_FAILURE_MESSAGE,
    cancellable_text_stream, error_stream,
};
use crate::session::{
    CompactionOutcome, CompactionPolicy, ConversationTurn, JsonFileSessionStore,
    MemorySessionStore, SessionLocks, SessionStore,
};
use crate::state::ConversationStateExtractor;
use crate::tools::ToolExecutor;

use super::catalog::{build_pipeline, builtin_descriptors};
use super::context::{ExecutionContext, TraceSection, TurnInput};
use super::descriptor::load_descriptors;
use super::outcome::{ChainOutcome, TurnReport, TurnRequest};
use super::routing::{Route, RoutingTable};
use super::stage::{Stage, StageRun, StageScope, run_stage};
use super::stages::StageDeps;

/// Registered stages plus the routing table that links them.
pub struct Pipeline {
    stages: HashMap<String, Arc<dyn Stage>>,
    routing: RoutingTable,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>, entry: &str) -> Result<Self, RoutingConfigError> {
        let descriptors: Vec<_> = stages
            .iter()
            .map(|stage| stage.descriptor().clone())
            .collect();
        let routing = RoutingTable::build(&descriptors, entry)?;
        let stages = stages
            .into_iter()
            .map(|stage| (stage.id().to_string(), stage))
            .collect();
        Ok(Self { stages, routing })
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn stage(&self, id: &str) -> Option<&Arc<dyn Stage>> {
        self.stages.get(id)
    }

    /// Walks the chain from the entry stage until a rule terminates it or a
    /// stage without successor has run. Stages run strictly one after another.
    pub async fn run_chain(
        &self,
        context: &mut ExecutionContext,
        turn: &TurnInput,
        cancel: &CancellationToken,
    ) -> Result<ChainOutcome, TurnError> {
        let mut current = self.routing.entry().to_string();
        let mut input = turn.entry_input();

        loop {
            let stage = self.stages.get(&current).ok_or_else(|| {
                TurnError::Pipeline(format!("stage `{current}` is not registered"))
            })?;
            let label = stage.descriptor().trace_label();

            info!(stage = %current, "stage started");
            context.record_stage_start(&current);
            context.record_trace(&label, TraceSection::Input, &input);

            let run = {
                let scope = StageScope {
                    context: &*context,
                    cancel,
                };
                run_stage(stage.as_ref(), &input, &scope).await?
            };
            match &run {
                StageRun::Completed { attempts, .. } => {
                    context.record_stage_end(&current, *attempts);
                }
                StageRun::ParseFallback { error, .. } => {
                    context.record_stage_fallback(&current, error.clone());
                }
                StageRun::Degraded {
                    attempts, error, ..
                } => {
                    context.record_stage_degraded(&current, *attempts, error.clone());
                }
            }

            let output = run.into_output();
            context.record_trace(&label, TraceSection::Output, &output);
            let route = self.routing.next(&current, &output);
            context.record_stage_result(&current, output.clone())?;

            match route {
                Route::Terminate {
                    rule_index,
                    payload,
                } => {
                    info!(stage = %current, rule_index, "chain terminated by rule");
                    context.record_termination(&current, Some(rule_index));
                    return Ok(ChainOutcome {
                        payload: FinalPayload::from_terminal(payload),
                        final_stage: current,
                        terminated_by_rule: true,
                    });
                }
                Route::End => {
                    debug!(stage = %current, "chain finished");
                    context.record_termination(&current, None);
                    return Ok(ChainOutcome {
                        payload: FinalPayload::from_stage_output(&output),
                        final_stage: current,
                        terminated_by_rule: false,
                    });
                }
                Route::Advance(next) => {
                    input = stage.handoff(&output, turn);
                    context.record_route(&current, &next);
                    current = next;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TurnSettings {
    history_window: usize,
    turn_timeout: Duration,
    stream_chunk_chars: usize,
    compaction: CompactionPolicy,
}

/// Drives turns end to end: session load, chain walk, rendering, persistence.
pub struct PipelineOrchestrator {
    pipeline: Pipeline,
    store: Arc<dyn SessionStore>,
    locks: SessionLocks,
    extractor: ConversationStateExtractor,
    renderer: ResponseRenderer,
    settings: TurnSettings,
}

impl PipelineOrchestrator {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Wires the configured stage catalog, the file store, and the given
    /// collaborators.
    pub fn from_config(
        config: &Config,
        client: Arc<DynReasoningClient>,
        tools: Arc<dyn ToolExecutor>,
    ) -> Result<Self> {
        let descriptors = match &config.pipeline.stages_dir {
            Some(dir) => load_descriptors(dir)
                .with_context(|| format!("Failed to load stage descriptors from {}", dir.display()))?,
            None => builtin_descriptors().context("Built-in stage descriptors are invalid")?,
        };
        let deps = StageDeps::new(client, tools);
        let pipeline = build_pipeline(descriptors, &config.pipeline.entry_stage, &deps)
            .context("Invalid stage configuration")?;

        let session = &config.session;
        let store = JsonFileSessionStore::new(&session.dir, session.max_history);

        Ok(Self::builder()
            .store(Arc::new(store))
            .history_window(session.history_window)
            .turn_timeout(config.pipeline.turn_timeout())
            .stream_chunk_chars(config.pipeline.stream_chunk_chars)
            .compaction(CompactionPolicy::new(
                session.compaction_soft_limit_bytes,
                session.compaction_hard_limit_bytes,
                session.max_history,
            ))
            .build_with(pipeline))
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Runs one turn under the configured deadline.
    ///
    /// Infrastructure failures abort the turn and leave an error marker on the
    /// session; stage failures never do.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        cancel: &CancellationToken,
    ) -> Result<TurnReport, TurnError> {
        let session_id = request.session_id.clone();
        let deadline = self.settings.turn_timeout;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TurnError::Cancelled),
            outcome = timeout(deadline, self.execute_turn(request, cancel)) => {
                outcome.unwrap_or(Err(TurnError::DeadlineExceeded(deadline)))
            }
        };

        match &result {
            Ok(report) => info!(
                session = %session_id,
                turn = report.turn_depth,
                stages = report.stages_run.len(),
                "turn completed"
            ),
            Err(TurnError::Cancelled) => info!(session = %session_id, "turn cancelled"),
            Err(err) => {
                error!(session = %session_id, error = %err, "turn failed");
                self.record_failure(&session_id, err).await;
            }
        }
        result
    }

    /// Runs the turn and delivers the rendered answer as a chunked stream.
    /// The stream always ends with exactly one `Complete` or `Error`; a
    /// cancelled turn or delivery ends with `Error(TURN_CANCELLED_MESSAGE)`.
    pub fn respond(self: &Arc<Self>, request: TurnRequest, cancel: CancellationToken) -> ResponseStream {
        let orchestrator = Arc::clone(self);
        let chunk_chars = self.settings.stream_chunk_chars;
        let delivery = cancel.clone();

        let events = stream::once(async move { orchestrator.run_turn(request, &cancel).await })
            .flat_map(move |result| match result {
                Ok(report) => {
                    cancellable_text_stream(&report.response_text, chunk_chars, delivery.clone())
                }
                Err(TurnError::Cancelled) => error_stream(TURN_CANCELLED_MESSAGE),
                Err(_) => error_stream(TURN_FAILURE_MESSAGE),
            });
        Box::pin(events)
    }

    async fn execute_turn(
        &self,
        request: TurnRequest,
        cancel: &CancellationToken,
    ) -> Result<TurnReport, TurnError> {
        let TurnRequest {
            session_id,
            query,
            customer,
        } = request;

        let guard = self.locks.acquire(&session_id).await;

        let record = match self.store.load(&session_id).await? {
            Some(record) => record,
            None => {
                info!(session = %session_id, "creating session");
                self.store
                    .create(&session_id, customer.clone().unwrap_or_default())
                    .await?
            }
        };
        let customer = customer.unwrap_or_else(|| record.customer_info.clone());
        let history = record.recent(self.settings.history_window);
        let state = self.extractor.extract_record(&record);

        let mut context = ExecutionContext::new(
            &session_id,
            record.turn_count + 1,
            history,
            state,
            customer,
        );
        let turn = TurnInput::new(query.clone(), &context);
        debug!(session = %session_id, turn = context.turn_depth, state = ?context.state, "turn context ready");

        let chain = self.pipeline.run_chain(&mut context, &turn, cancel).await?;

        let mut next_state = context.state.clone();
        for (stage_id, output) in context.stage_results() {
            if let Some(stage) = self.pipeline.stage(stage_id) {
                stage.apply_state(output, &mut next_state);
            }
        }

        let response_text = self
            .renderer
            .render(&chain.payload, &context.customer, &next_state);
        let persisted = ConversationTurn::new(
            query,
            response_text.clone(),
            context.trace_text(),
            Some(next_state.clone()),
        );
        self.store.append_turn(&session_id, persisted).await?;
        drop(guard);

        self.schedule_compaction(&session_id);

        Ok(TurnReport {
            session_id,
            turn_depth: context.turn_depth,
            response_text,
            payload: chain.payload,
            state: next_state,
            stages_run: context.stages_run(),
            terminated_by_rule: chain.terminated_by_rule,
            events: context.take_events(),
        })
    }

    /// Best effort; the original failure is what the caller sees.
    async fn record_failure(&self, session_id: &str, failure: &TurnError) {
        let _guard = self.locks.acquire(session_id).await;
        if let Err(err) = self.store.mark_error(session_id, &failure.to_string()).await {
            warn!(session = %session_id, error = %err, "could not record error marker");
        }
    }

    /// Fire-and-forget; skipped while another holder owns the session.
    fn schedule_compaction(&self, session_id: &str) {
        let store = Arc::clone(&self.store);
        let locks = self.locks.clone();
        let policy = self.settings.compaction;
        let session_id = session_id.to_string();

        tokio::spawn(async move {
            let Some(_guard) = locks.try_acquire(&session_id) else {
                debug!(session = %session_id, "session busy, skipping compaction");
                return;
            };
            match store.compact(&session_id, &policy).await {
                Ok(CompactionOutcome::Untouched) => {}
                Ok(outcome) => info!(session = %session_id, ?outcome, "session compacted"),
                Err(err) => warn!(session = %session_id, error = %err, "session compaction failed"),
            }
        });
    }
}

pub struct PipelineBuilder {
    stages: Vec<Arc<dyn Stage>>,
    entry: String,
    store: Option<Arc<dyn SessionStore>>,
    settings: TurnSettings,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            entry: DEFAULT_ENTRY_STAGE.to_string(),
            store: None,
            settings: TurnSettings {
                history_window: DEFAULT_HISTORY_WINDOW,
                turn_timeout: Duration::from_secs(DEFAULT_TURN_TIMEOUT_SECS),
                stream_chunk_chars: DEFAULT_STREAM_CHUNK_CHARS,
                compaction: CompactionPolicy::new(
                    DEFAULT_COMPACTION_SOFT_LIMIT_BYTES,
                    DEFAULT_COMPACTION_HARD_LIMIT_BYTES,
                    DEFAULT_MAX_HISTORY,
                ),
            },
        }
    }

    pub fn add_stage<S>(mut self, stage: S) -> Self
    where
        S: Stage + 'static,
    {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn add_shared_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn entry_stage(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }

    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn history_window(mut self, turns: usize) -> Self {
        self.settings.history_window = turns;
        self
    }

    pub fn turn_timeout(mut self, deadline: Duration) -> Self {
        self.settings.turn_timeout = deadline;
        self
    }

    pub fn stream_chunk_chars(mut self, chars: usize) -> Self {
        self.settings.stream_chunk_chars = chars.max(1);
        self
    }

    pub fn compaction(mut self, policy: CompactionPolicy) -> Self {
        self.settings.compaction = policy;
        self
    }

    /// Validates the routing of the added stages.
    pub fn build(mut self) -> Result<PipelineOrchestrator, RoutingConfigError> {
        let stages = std::mem::take(&mut self.stages);
        let pipeline = Pipeline::new(stages, &self.entry)?;
        Ok(self.build_with(pipeline))
    }

    /// Uses an already validated pipeline; added stages are ignored.
    pub fn build_with(self, pipeline: Pipeline) -> PipelineOrchestrator {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemorySessionStore::new(DEFAULT_MAX_HISTORY)));
        PipelineOrchestrator {
            pipeline,
            store,
            locks: SessionLocks::new(),
            extractor: ConversationStateExtractor::new(),
            renderer: ResponseRenderer::new(),
            settings: self.settings,
        }
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
