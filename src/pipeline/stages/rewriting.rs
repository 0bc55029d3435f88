use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::client::DynReasoningClient;
use crate::error::StageError;
use crate::pipeline::context::TurnInput;
use crate::pipeline::descriptor::StageDescriptor;
use crate::pipeline::prompt::{
    bullet_list, merge_unique, parse_json_object, request_line, str_field,
};
use crate::pipeline::stage::{Stage, StageScope};

use super::{accounts_mentioned, context_summary};

const GENERAL_TOPIC: &str = "general";
const DEFAULT_TOPIC: &str = "banking";
const DIRECT_RESPONSE_FALLBACK: &str =
    "죄송합니다. 질문에 대한 답변을 생성하는 중 오류가 발생했습니다.";
const DIRECT_RESPONSE_SYSTEM_PROMPT: &str = "당신은 친절한 은행 상담원입니다. \
은행 업무와 관련 없는 질문에는 짧고 정중하게 답하고, 은행 서비스로 안내하세요.";

/// Resolves references against the conversation so far and classifies the
/// topic. General questions are answered here directly.
///
/// Default output: the query unchanged, topic `banking`, no direct response.
pub struct RewritingStage {
    descriptor: StageDescriptor,
    client: Arc<DynReasoningClient>,
}

impl RewritingStage {
    pub fn new(descriptor: StageDescriptor, client: Arc<DynReasoningClient>) -> Self {
        Self { descriptor, client }
    }

    fn default_topic(&self) -> &str {
        self.descriptor.setting_str("default_topic").unwrap_or(DEFAULT_TOPIC)
    }

    fn build_prompt(&self, query: &str, input: &Value, scope: &StageScope<'_>) -> String {
        let state = &scope.context.state;
        let mut guide = Vec::new();
        let mut mentioned = Vec::new();
        merge_unique(&mut mentioned, accounts_mentioned(input));
        if !mentioned.is_empty() {
            guide.push(format!("- 언급된 계좌: {}", mentioned.join(", ")));
        }
        if let Some(entity) = &state.selected_entity {
            guide.push(format!("- 현재 선택된 계좌: {entity}"));
        }
        if let Some(intent) = &state.last_intent {
            guide.push(format!("- 이전 의도: {intent}"));
        }
        let guide = if guide.is_empty() {
            "참조 해결 가이드 없음".to_string()
        } else {
            guide.join("\n")
        };

        [
            "이전 대화:".to_string(),
            context_summary(input, self.descriptor.setting_usize("max_context_entries")),
            String::new(),
            "현재 상태:".to_string(),
            state.describe(),
            String::new(),
            "참조 해결 가이드:".to_string(),
            guide,
            String::new(),
            "주제 목록:".to_string(),
            bullet_list(self.descriptor.setting_object("topics")),
            String::new(),
            request_line(query),
            String::new(),
            "지시대명사(그 계좌, 아까 그거 등)를 이전 대화의 구체적인 값으로 바꿔 질문을 다시 쓰고 주제를 분류하세요.".to_string(),
            "다음 JSON 형식으로만 답하세요:".to_string(),
            r#"{"rewritten_text": "재작성된 질문", "topic": "주제", "is_general": false, "context_used": false}"#
                .to_string(),
        ]
        .join("\n")
    }

    /// Second reasoning call for out-of-domain questions. Never fails the stage.
    async fn direct_answer(&self, query: &str) -> String {
        let system_prompt = self
            .descriptor
            .setting_str("direct_response_prompt")
            .unwrap_or(DIRECT_RESPONSE_SYSTEM_PROMPT);
        let user_prompt = format!("사용자 질문: {query}");

        match self.client.complete(system_prompt, &user_prompt).await {
            Ok(answer) => answer.trim().to_string(),
            Err(err) => {
                warn!(error = %err, "direct answer generation failed");
                DIRECT_RESPONSE_FALLBACK.to_string()
            }
        }
    }
}

#[async_trait]
impl Stage for RewritingStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn process(&self, input: &Value, scope: &StageScope<'_>) -> Result<Value, StageError> {
        let query = str_field(input, "query").unwrap_or_default();
        let prompt = self.build_prompt(query, input, scope);
        let reply = self
            .client
            .complete(&self.descriptor.system_prompt, &prompt)
            .await?;

        let parsed = parse_json_object(&reply)?;
        let rewritten = parsed
            .get("rewritten_text")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| StageError::ResponseParse("empty rewritten_text".into()))?;
        // A missing topic is not a general question; `is_general` says so explicitly.
        let topic = parsed
            .get("topic")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|topic| !topic.is_empty())
            .unwrap_or_else(|| self.default_topic());
        let is_general = parsed
            .get("is_general")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let context_used = parsed
            .get("context_used")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let direct_response = if topic == GENERAL_TOPIC || is_general {
            debug!(topic, "general question, answering directly");
            self.direct_answer(query).await
        } else {
            String::new()
        };

        Ok(json!({
            "rewritten_text": rewritten,
            "topic": topic,
            "is_general": is_general,
            "context_used": context_used,
            "direct_response": direct_response,
        }))
    }

    fn default_output(&self, input: &Value, _scope: &StageScope<'_>) -> Value {
        json!({
            "rewritten_text": str_field(input, "query").unwrap_or_default(),
            "topic": self.default_topic(),
            "is_general": false,
            "context_used": false,
            "direct_response": "",
        })
    }

    fn handoff(&self, output: &Value, turn: &TurnInput) -> Value {
        let mut next = turn.carry();
        for key in ["rewritten_text", "topic"] {
            next.insert(
                key.into(),
                output.get(key).cloned().unwrap_or_else(|| json!("")),
            );
        }
        Value::Object(next)
    }
}
