use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::client::{DynReasoningClient, OfflineReasoningClient, ReasoningClient};
use crate::error::{ReasoningError, RoutingConfigError, StageError, StoreError, TurnError};
use crate::response::{
    FinalPayload, ResponseEvent, TURN_CANCELLED_MESSAGE, TURN_FAILURE_MESSAGE, collect_text,
};
use crate::retry::RetrySpec;
use crate::schema::Schema;
use crate::session::{ConversationTurn, MemorySessionStore, SessionRecord, SessionStore};
use crate::state::ConversationStateExtractor;
use crate::tools::StaticToolExecutor;

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

type Script = Box<dyn Fn(u32) -> Result<Value, StageError> + Send + Sync>;

struct ScriptedStage {
    descriptor: StageDescriptor,
    calls: Arc<AtomicU32>,
    script: Script,
}

impl ScriptedStage {
    fn new(
        descriptor: StageDescriptor,
        script: impl Fn(u32) -> Result<Value, StageError> + Send + Sync + 'static,
    ) -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let stage = Self {
            descriptor,
            calls: Arc::clone(&calls),
            script: Box::new(script),
        };
        (stage, calls)
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn process(&self, _input: &Value, _scope: &StageScope<'_>) -> Result<Value, StageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        (self.script)(call)
    }

    fn default_output(&self, _input: &Value, _scope: &StageScope<'_>) -> Value {
        json!({ "fallback": self.descriptor.name })
    }
}

/// Fails the first `fail_first` calls, then delegates.
struct FlakyClient {
    inner: Arc<DynReasoningClient>,
    fail_first: usize,
    calls: AtomicUsize,
}

impl FlakyClient {
    fn new(inner: Arc<DynReasoningClient>, fail_first: usize) -> Self {
        Self {
            inner,
            fail_first,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningClient for FlakyClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, ReasoningError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(ReasoningError::Transport("connection reset".into()));
        }
        self.inner.complete(system_prompt, user_prompt).await
    }
}

struct FixedClient(&'static str);

#[async_trait]
impl ReasoningClient for FixedClient {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, ReasoningError> {
        Ok(self.0.to_string())
    }
}

struct HangingClient;

#[async_trait]
impl ReasoningClient for HangingClient {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, ReasoningError> {
        std::future::pending::<Result<String, ReasoningError>>().await
    }
}

struct FailingStore;

fn disk_offline() -> StoreError {
    StoreError::Io(io::Error::other("disk offline"))
}

#[async_trait]
impl SessionStore for FailingStore {
    async fn load(&self, _session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        Err(disk_offline())
    }

    async fn save(&self, _record: &SessionRecord) -> Result<(), StoreError> {
        Err(disk_offline())
    }

    async fn delete(&self, _session_id: &str) -> Result<bool, StoreError> {
        Err(disk_offline())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        Err(disk_offline())
    }

    fn max_history(&self) -> usize {
        10
    }
}

fn no_wait(max_attempts: u32) -> RetrySpec {
    RetrySpec {
        max_attempts,
        base_delay_ms: 0,
        max_delay_ms: 0,
    }
}

fn plain(name: &str) -> StageDescriptor {
    StageDescriptor::new(name, Schema::Object, Schema::Object).with_retry(no_wait(3))
}

fn offline_orchestrator(client: Arc<DynReasoningClient>) -> PipelineOrchestrator {
    let deps = StageDeps::new(client, Arc::new(StaticToolExecutor::builtin()));
    let pipeline = build_pipeline(builtin_descriptors().unwrap(), "rewriting", &deps).unwrap();
    PipelineOrchestrator::builder()
        .store(Arc::new(MemorySessionStore::new(100)))
        .build_with(pipeline)
}

fn offline() -> Arc<DynReasoningClient> {
    Arc::new(OfflineReasoningClient::new())
}

// ---------------------------------------------------------------------------
// Routing table
// ---------------------------------------------------------------------------

#[test]
fn routing_rejects_unknown_successor() {
    let err = RoutingTable::build(&[plain("a").with_successor("ghost")], "a").unwrap_err();
    assert_eq!(
        err,
        RoutingConfigError::UnknownSuccessor {
            stage: "a".into(),
            successor: "ghost".into()
        }
    );
}

#[test]
fn routing_rejects_greedy_cycle() {
    let descriptors = [
        plain("a").with_successor("b"),
        plain("b").with_successor("a"),
    ];
    let err = RoutingTable::build(&descriptors, "a").unwrap_err();
    assert_eq!(err, RoutingConfigError::Cycle(vec!["a".into(), "b".into(), "a".into()]));
}

#[test]
fn routing_rejects_cycle_unreachable_from_entry() {
    let descriptors = [
        plain("entry"),
        plain("x").with_successor("y"),
        plain("y").with_successor("x"),
    ];
    assert!(matches!(
        RoutingTable::build(&descriptors, "entry"),
        Err(RoutingConfigError::Cycle(_))
    ));
}

#[test]
fn routing_rejects_bad_entry_duplicates_and_rules() {
    assert_eq!(
        RoutingTable::build(&[plain("a")], "b").unwrap_err(),
        RoutingConfigError::UnknownEntry("b".into())
    );
    assert_eq!(
        RoutingTable::build(&[plain("a"), plain("a")], "a").unwrap_err(),
        RoutingConfigError::DuplicateStage("a".into())
    );
    assert_eq!(RoutingTable::build(&[], "a").unwrap_err(), RoutingConfigError::Empty);

    let mut rule = ConditionalRule::terminate("topic", "general", "answer");
    rule.terminal_payload_field = None;
    assert!(matches!(
        RoutingTable::build(&[plain("a").with_rule(rule)], "a"),
        Err(RoutingConfigError::InvalidRule { .. })
    ));

    assert!(matches!(
        RoutingTable::build(&[plain("a").with_retry(no_wait(0))], "a"),
        Err(RoutingConfigError::InvalidRetry { .. })
    ));
}

#[test]
fn first_matching_rule_decides() {
    let descriptors = [
        plain("a")
            .with_successor("b")
            .with_rule(ConditionalRule::proceed("topic", "banking"))
            .with_rule(ConditionalRule::terminate("topic", "general", "answer"))
            .with_rule(ConditionalRule::terminate("topic", "banking", "answer")),
        plain("b").with_successor("c").with_successor("a"),
        plain("c"),
    ];
    let table = RoutingTable::build(&descriptors, "a").unwrap();

    assert_eq!(
        table.next("a", &json!({ "topic": "general", "answer": "hi" })),
        Route::Terminate {
            rule_index: 1,
            payload: json!("hi")
        }
    );
    assert_eq!(
        table.next("a", &json!({ "topic": "banking", "answer": "hi" })),
        Route::Advance("b".into())
    );
    // Extra successors are accepted but never followed.
    assert_eq!(table.next("b", &json!({})), Route::Advance("c".into()));
    assert_eq!(table.next("c", &json!({})), Route::End);
    assert_eq!(table.chain(), vec!["a", "b", "c"]);
}

#[test]
fn rule_predicates_follow_dotted_paths() {
    let rule = ConditionalRule::terminate("meta.flags.stop", true, "meta.reply");
    let output = json!({ "meta": { "flags": { "stop": true }, "reply": "bye" } });
    assert!(rule.matches(&output));
    assert_eq!(rule.payload(&output), json!("bye"));
    assert!(!rule.matches(&json!({ "meta": { "flags": { "stop": "true" } } })));
}

// ---------------------------------------------------------------------------
// Chain execution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn terminate_rule_skips_downstream_stages() {
    let (a, a_calls) = ScriptedStage::new(
        plain("a")
            .with_successor("b")
            .with_rule(ConditionalRule::terminate("topic", "general", "answer")),
        |_| Ok(json!({ "topic": "general", "answer": "바로 답변" })),
    );
    let (b, b_calls) = ScriptedStage::new(plain("b").with_successor("c"), |_| Ok(json!({})));
    let (c, c_calls) = ScriptedStage::new(plain("c"), |_| Ok(json!({})));

    let orchestrator = PipelineOrchestrator::builder()
        .entry_stage("a")
        .add_stage(a)
        .add_stage(b)
        .add_stage(c)
        .build()
        .unwrap();

    let report = orchestrator
        .run_turn(TurnRequest::new("s", "날씨 어때?"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.response_text, "바로 답변");
    assert_eq!(report.payload, FinalPayload::Direct("바로 답변".into()));
    assert!(report.terminated_by_rule);
    assert_eq!(report.stages_run, vec!["a"]);
    assert_eq!(a_calls.load(Ordering::SeqCst), 1);
    assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    assert_eq!(c_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn chain_runs_to_last_stage() {
    let (a, _) = ScriptedStage::new(plain("a").with_successor("b"), |_| Ok(json!({ "step": 1 })));
    let (b, _) = ScriptedStage::new(plain("b"), |_| {
        Ok(json!({ "tool_name": "general_inquiry", "tool_output": { "response": "완료" } }))
    });
    let orchestrator = PipelineOrchestrator::builder()
        .entry_stage("a")
        .add_stage(a)
        .add_stage(b)
        .build()
        .unwrap();

    let report = orchestrator
        .run_turn(TurnRequest::new("s", "q"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.response_text, "완료");
    assert!(!report.terminated_by_rule);
    assert_eq!(report.stages_run, vec!["a", "b"]);
    assert!(report.events.contains(&PipelineEvent::Routed {
        from: "a".into(),
        to: "b".into()
    }));
    assert!(!report.degraded());
}

#[tokio::test]
async fn exhausted_stage_degrades_and_chain_continues() {
    let (a, _) = ScriptedStage::new(plain("a").with_successor("b"), |_| Ok(json!({})));
    let (b, b_calls) = ScriptedStage::new(plain("b").with_successor("c"), |_| {
        Err(StageError::EmptyReasoningResult)
    });
    let (c, c_calls) = ScriptedStage::new(plain("c"), |_| {
        Ok(json!({ "tool_name": "general_inquiry", "tool_output": { "response": "계속" } }))
    });
    let orchestrator = PipelineOrchestrator::builder()
        .entry_stage("a")
        .add_stage(a)
        .add_stage(b)
        .add_stage(c)
        .build()
        .unwrap();

    let report = orchestrator
        .run_turn(TurnRequest::new("s", "q"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(b_calls.load(Ordering::SeqCst), 3);
    assert_eq!(c_calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.response_text, "계속");
    assert!(report.degraded());
    assert!(report.events.iter().any(|event| matches!(
        event,
        PipelineEvent::StageDegraded { stage, attempts: 3, .. } if stage == "b"
    )));
}

#[tokio::test]
async fn parse_errors_fall_back_without_retrying() {
    let (a, a_calls) = ScriptedStage::new(plain("a"), |_| {
        Err(StageError::ResponseParse("not json".into()))
    });
    let orchestrator = PipelineOrchestrator::builder()
        .entry_stage("a")
        .add_stage(a)
        .build()
        .unwrap();

    let report = orchestrator
        .run_turn(TurnRequest::new("s", "q"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(a_calls.load(Ordering::SeqCst), 1);
    assert!(matches!(
        report.events.as_slice(),
        [
            PipelineEvent::StageStarted(_),
            PipelineEvent::StageFellBack { .. },
            PipelineEvent::Terminated { rule_index: None, .. }
        ]
    ));
}

#[tokio::test]
async fn output_schema_violation_counts_as_failed_attempt() {
    let descriptor = StageDescriptor::new(
        "a",
        Schema::Object,
        Schema::fields([("intent", Schema::String)]),
    )
    .with_retry(no_wait(3));
    let (a, calls) = ScriptedStage::new(descriptor, |call| {
        if call == 1 {
            Ok(json!({ "intent": 7 }))
        } else {
            Ok(json!({ "intent": "check_balance", "direct_response": "ok" }))
        }
    });
    let stage: Arc<dyn Stage> = Arc::new(a);
    let context = ExecutionContext::new("s", 1, Vec::new(), Default::default(), Default::default());
    let cancel = CancellationToken::new();
    let scope = StageScope {
        context: &context,
        cancel: &cancel,
    };

    let run = run_stage(stage.as_ref(), &json!({}), &scope).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(matches!(run, StageRun::Completed { attempts: 2, .. }));
}

#[tokio::test]
async fn input_schema_violation_degrades_without_processing() {
    let descriptor = StageDescriptor::new(
        "a",
        Schema::fields([("query", Schema::String)]),
        Schema::Object,
    )
    .with_retry(no_wait(2));
    let (a, calls) = ScriptedStage::new(descriptor, |_| Ok(json!({})));
    let context = ExecutionContext::new("s", 1, Vec::new(), Default::default(), Default::default());
    let cancel = CancellationToken::new();
    let scope = StageScope {
        context: &context,
        cancel: &cancel,
    };

    let run = run_stage(&a, &json!({ "query": 1 }), &scope).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    match run {
        StageRun::Degraded {
            output,
            attempts,
            error,
        } => {
            assert_eq!(attempts, 2);
            assert_eq!(output, json!({ "fallback": "a" }));
            assert!(error.contains("input.query"), "{error}");
        }
        other => panic!("expected degradation, got {other:?}"),
    }
}

#[test]
fn stage_results_reject_reentry() {
    let mut context =
        ExecutionContext::new("s", 1, Vec::new(), Default::default(), Default::default());
    context.record_stage_result("a", json!({ "x": 1 })).unwrap();
    assert!(matches!(
        context.record_stage_result("a", json!({})),
        Err(TurnError::Pipeline(_))
    ));
    assert_eq!(context.stage_result("a"), Some(&json!({ "x": 1 })));
}

#[test]
fn trace_lines_use_stage_labels() {
    let mut context =
        ExecutionContext::new("s", 1, Vec::new(), Default::default(), Default::default());
    context.record_trace("Domain", TraceSection::Output, &json!({ "tool_name": "loan_info" }));
    assert_eq!(
        context.trace_text(),
        "Domain Agent Output: {\"tool_name\":\"loan_info\"}\n"
    );
}

// ---------------------------------------------------------------------------
// Built-in chain scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn balance_question_reports_the_tool_balance() {
    let orchestrator = offline_orchestrator(offline());

    let report = orchestrator
        .run_turn(TurnRequest::new("s1", "계좌 잔액 확인해줘"), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.response_text.contains("1,500,000원"), "{}", report.response_text);
    assert_eq!(report.stages_run, vec!["rewriting", "preprocessing", "supervisor", "domain"]);
    assert_eq!(report.payload.tool_name(), "account_balance");
    assert_eq!(report.state.last_intent.as_deref(), Some("check_balance"));
    assert_eq!(report.state.selected_entity.as_deref(), Some("110-123-456789"));
    assert!(report.state.pending_action.is_none());

    let history = orchestrator.store().get_history("s1", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state_snapshot.as_ref(), Some(&report.state));
    assert_eq!(history[0].final_response_text, report.response_text);
}

#[tokio::test]
async fn out_of_domain_question_is_answered_by_first_stage() {
    let client = Arc::new(FlakyClient::new(offline(), 0));
    let orchestrator = offline_orchestrator(client.clone());
    let query = "오늘 날씨 어때?";

    let report = orchestrator
        .run_turn(TurnRequest::new("s1", query), &CancellationToken::new())
        .await
        .unwrap();

    let direct = OfflineReasoningClient::new()
        .complete("", &format!("사용자 질문: {query}"))
        .await
        .unwrap();
    assert_eq!(report.response_text, direct);
    assert!(report.terminated_by_rule);
    assert_eq!(report.stages_run, vec!["rewriting"]);
    // Classification plus the direct answer; no downstream stage ran.
    assert_eq!(client.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_do_not_change_the_result() {
    let query = "대출 한도 알려줘";

    let clean = offline_orchestrator(offline())
        .run_turn(TurnRequest::new("s", query), &CancellationToken::new())
        .await
        .unwrap();

    let flaky_client = Arc::new(FlakyClient::new(offline(), 2));
    let started = tokio::time::Instant::now();
    let flaky = offline_orchestrator(flaky_client.clone())
        .run_turn(TurnRequest::new("s", query), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(flaky.response_text, clean.response_text);
    assert_eq!(flaky.state, clean.state);
    assert_eq!(flaky.stages_run, clean.stages_run);
    // 1s before the second attempt, 2s before the third.
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(flaky_client.calls(), 4 + 2);
}

#[tokio::test]
async fn unparseable_replies_still_produce_an_answer() {
    let orchestrator = offline_orchestrator(Arc::new(FixedClient("I cannot answer in JSON")));

    let report = orchestrator
        .run_turn(TurnRequest::new("s", "뭐든 해줘"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.response_text, "일반 문의에 대한 답변입니다.");
    assert!(report.degraded());
    assert_eq!(report.state.last_intent.as_deref(), Some("general_inquiry"));
}

#[tokio::test]
async fn missing_topic_is_not_treated_as_general() {
    let orchestrator = offline_orchestrator(Arc::new(FixedClient(r#"{"rewritten_text": "잔액 알려줘"}"#)));

    let report = orchestrator
        .run_turn(TurnRequest::new("s", "잔액 알려줘"), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.terminated_by_rule);
    assert_eq!(report.stages_run, vec!["rewriting", "preprocessing", "supervisor", "domain"]);
    let history = orchestrator.store().get_history("s", 1).await.unwrap();
    assert!(
        history[0].trace_record.contains("\"topic\":\"banking\""),
        "{}",
        history[0].trace_record
    );
}

#[tokio::test]
async fn follow_up_turn_reuses_the_selected_account() {
    let orchestrator = offline_orchestrator(offline());
    let cancel = CancellationToken::new();

    orchestrator
        .run_turn(TurnRequest::new("s", "계좌 잔액 확인해줘"), &cancel)
        .await
        .unwrap();
    let second = orchestrator
        .run_turn(TurnRequest::new("s", "그 계좌 잔액 다시 알려줘"), &cancel)
        .await
        .unwrap();

    assert_eq!(second.turn_depth, 2);
    assert_eq!(second.state.selected_entity.as_deref(), Some("110-123-456789"));

    let history = orchestrator.store().get_history("s", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(
        history[1]
            .trace_record
            .contains("\"tool_input\":{\"account_number\":\"110-123-456789\"}"),
        "{}",
        history[1].trace_record
    );
}

#[tokio::test]
async fn state_carries_over_when_no_history_is_shown() {
    let deps = StageDeps::new(offline(), Arc::new(StaticToolExecutor::builtin()));
    let pipeline = build_pipeline(builtin_descriptors().unwrap(), "rewriting", &deps).unwrap();
    let orchestrator = PipelineOrchestrator::builder()
        .history_window(0)
        .build_with(pipeline);
    let cancel = CancellationToken::new();

    orchestrator
        .run_turn(TurnRequest::new("s", "계좌 잔액 확인해줘"), &cancel)
        .await
        .unwrap();
    let second = orchestrator
        .run_turn(TurnRequest::new("s", "오늘 날씨 어때?"), &cancel)
        .await
        .unwrap();

    assert!(second.terminated_by_rule);
    assert_eq!(second.state.selected_entity.as_deref(), Some("110-123-456789"));
    assert_eq!(second.state.last_intent.as_deref(), Some("check_balance"));
}

#[tokio::test]
async fn state_set_before_the_first_turn_is_used() {
    let orchestrator = offline_orchestrator(offline());
    let store = orchestrator.store();
    store.create("s", Default::default()).await.unwrap();
    let state = crate::state::ConversationState {
        selected_entity: Some("999-999".into()),
        ..Default::default()
    };
    assert!(store.update_state("s", state).await.unwrap());

    let report = orchestrator
        .run_turn(TurnRequest::new("s", "오늘 날씨 어때?"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.state.selected_entity.as_deref(), Some("999-999"));
    let history = orchestrator.store().get_history("s", 1).await.unwrap();
    assert_eq!(
        history[0].state_snapshot.as_ref().and_then(|s| s.selected_entity.as_deref()),
        Some("999-999")
    );
}

#[tokio::test]
async fn trace_still_supports_legacy_state_recovery() {
    let orchestrator = offline_orchestrator(offline());
    orchestrator
        .run_turn(TurnRequest::new("s", "계좌 잔액 확인해줘"), &CancellationToken::new())
        .await
        .unwrap();

    let history = orchestrator.store().get_history("s", 1).await.unwrap();
    let without_snapshot =
        ConversationTurn::new("q", "a", history[0].trace_record.clone(), None);
    let recovered = ConversationStateExtractor::new().extract(&[without_snapshot]);

    assert_eq!(recovered.selected_entity.as_deref(), Some("110-123-456789"));
    assert_eq!(recovered.last_intent.as_deref(), Some("check_balance"));
}

#[tokio::test]
async fn customer_name_personalises_the_answer() {
    let orchestrator = offline_orchestrator(offline());
    let mut customer = serde_json::Map::new();
    customer.insert("name".into(), json!("홍길동"));

    let report = orchestrator
        .run_turn(
            TurnRequest::new("s", "대출 가능 금액 알려줘").with_customer(customer),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(report.response_text.starts_with("홍길동님, "), "{}", report.response_text);
    let info = orchestrator.store().info("s").await.unwrap().unwrap();
    assert_eq!(info.customer_info["name"], "홍길동");
}

#[tokio::test]
async fn concurrent_turns_on_one_session_are_serialised() {
    let orchestrator = offline_orchestrator(offline());
    let cancel = CancellationToken::new();

    let (first, second) = tokio::join!(
        orchestrator.run_turn(TurnRequest::new("s", "계좌 잔액 확인해줘"), &cancel),
        orchestrator.run_turn(TurnRequest::new("s", "환율 알려줘"), &cancel),
    );
    let mut depths = vec![first.unwrap().turn_depth, second.unwrap().turn_depth];
    depths.sort();

    assert_eq!(depths, vec![1, 2]);
    let record = orchestrator.store().load("s").await.unwrap().unwrap();
    assert_eq!(record.history.len(), 2);
    assert_eq!(record.turn_count, 2);
}

// ---------------------------------------------------------------------------
// Deadlines, cancellation, infrastructure failure
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn deadline_aborts_turn_and_marks_session() {
    let deps = StageDeps::new(Arc::new(HangingClient), Arc::new(StaticToolExecutor::builtin()));
    let pipeline = build_pipeline(builtin_descriptors().unwrap(), "rewriting", &deps).unwrap();
    let orchestrator = PipelineOrchestrator::builder()
        .turn_timeout(Duration::from_secs(5))
        .build_with(pipeline);

    let err = orchestrator
        .run_turn(TurnRequest::new("s", "잔액"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, TurnError::DeadlineExceeded(d) if d == Duration::from_secs(5)));
    let info = orchestrator.store().info("s").await.unwrap().unwrap();
    assert!(info.error_recovery.is_some());
    assert_eq!(info.conversation_count, 0);
}

#[tokio::test]
async fn cancelled_turn_touches_nothing() {
    let orchestrator = offline_orchestrator(offline());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = orchestrator
        .run_turn(TurnRequest::new("s", "잔액"), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, TurnError::Cancelled));
    assert!(orchestrator.store().load("s").await.unwrap().is_none());
}

#[tokio::test]
async fn cancelled_respond_ends_with_cancelled_marker() {
    let orchestrator = Arc::new(offline_orchestrator(offline()));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let events: Vec<_> = orchestrator
        .respond(TurnRequest::new("s", "계좌 잔액 확인해줘"), cancel)
        .collect()
        .await;

    assert_eq!(events, vec![ResponseEvent::Error(TURN_CANCELLED_MESSAGE.into())]);
    assert!(orchestrator.store().load("s").await.unwrap().is_none());
}

#[tokio::test]
async fn store_failure_is_a_hard_error() {
    let deps = StageDeps::new(offline(), Arc::new(StaticToolExecutor::builtin()));
    let pipeline = build_pipeline(builtin_descriptors().unwrap(), "rewriting", &deps).unwrap();
    let orchestrator = PipelineOrchestrator::builder()
        .store(Arc::new(FailingStore))
        .build_with(pipeline);

    let err = orchestrator
        .run_turn(TurnRequest::new("s", "잔액"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TurnError::Store(StoreError::Io(_))));

    let stream = Arc::new(orchestrator).respond(TurnRequest::new("s", "잔액"), CancellationToken::new());
    assert_eq!(collect_text(stream).await.unwrap_err(), TURN_FAILURE_MESSAGE);
}

#[tokio::test]
async fn respond_streams_the_rendered_answer() {
    let orchestrator = Arc::new(offline_orchestrator(offline()));

    let text = collect_text(orchestrator.respond(
        TurnRequest::new("s", "계좌 잔액 확인해줘"),
        CancellationToken::new(),
    ))
    .await
    .unwrap();

    assert!(text.contains("1,500,000원"), "{text}");
    let history = orchestrator.store().get_history("s", 1).await.unwrap();
    assert_eq!(history[0].final_response_text, text);
}

// ---------------------------------------------------------------------------
// Descriptor loading
// ---------------------------------------------------------------------------

#[test]
fn builtin_catalog_forms_the_banking_chain() {
    let descriptors = builtin_descriptors().unwrap();
    let table = RoutingTable::build(&descriptors, "rewriting").unwrap();
    assert_eq!(table.chain(), vec!["rewriting", "preprocessing", "supervisor", "domain"]);

    let domain = descriptors.iter().find(|d| d.name == "domain").unwrap();
    assert_eq!(domain.trace_label(), "Domain");
    assert!(domain.setting_object("intent_tool_mapping").is_some());
}

#[test]
fn trace_label_defaults_to_capitalised_kind() {
    let descriptor = plain("second").with_kind("preprocessing");
    assert_eq!(descriptor.kind(), "preprocessing");
    assert_eq!(descriptor.trace_label(), "Preprocessing");
}

fn write_descriptors(dir: &TempDir, descriptors: &[StageDescriptor]) {
    for (index, descriptor) in descriptors.iter().enumerate() {
        let path = dir.path().join(format!("{index:02}-{}.json", descriptor.name));
        std::fs::write(path, serde_json::to_string_pretty(descriptor).unwrap()).unwrap();
    }
    std::fs::write(dir.path().join("README.txt"), "ignored").unwrap();
}

#[test]
fn descriptors_load_from_directory() {
    let dir = TempDir::new().unwrap();
    write_descriptors(&dir, &builtin_descriptors().unwrap());

    let loaded = load_descriptors(dir.path()).unwrap();
    assert_eq!(loaded, builtin_descriptors().unwrap());
}

#[test]
fn bad_configuration_fails_at_load_time() {
    let deps = StageDeps::new(offline(), Arc::new(StaticToolExecutor::builtin()));

    let mut descriptors = builtin_descriptors().unwrap();
    descriptors[0].successors = vec!["postprocessing".into()];
    assert!(matches!(
        build_pipeline(descriptors, "rewriting", &deps),
        Err(RoutingConfigError::UnknownSuccessor { .. })
    ));

    let mut descriptors = builtin_descriptors().unwrap();
    descriptors[3].kind = Some("quality_check".into());
    assert!(matches!(
        build_pipeline(descriptors, "rewriting", &deps),
        Err(RoutingConfigError::UnknownKind { .. })
    ));

    let mut descriptors = builtin_descriptors().unwrap();
    descriptors[2]
        .settings
        .insert("intent_domain_mapping".into(), json!(["account"]));
    assert!(matches!(
        build_pipeline(descriptors, "rewriting", &deps),
        Err(RoutingConfigError::InvalidSettings { .. })
    ));

    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("broken.json"), "{ \"name\": ").unwrap();
    assert!(matches!(
        load_descriptors(dir.path()),
        Err(RoutingConfigError::Descriptor { .. })
    ));
}

#[test]
fn schema_definitions_are_checked_when_parsing() {
    let source = json!({
        "name": "a",
        "input_schema": { "query": "text" },
        "output_schema": "object"
    })
    .to_string();
    assert!(matches!(
        parse_descriptor(&source, "inline"),
        Err(RoutingConfigError::Descriptor { .. })
    ));
}
