use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::client::DynReasoningClient;
use crate::error::StageError;
use crate::pipeline::context::TurnInput;
use crate::pipeline::descriptor::StageDescriptor;
use crate::pipeline::prompt::{bullet_list, parse_json_object, request_line, str_field};
use crate::pipeline::stage::{Stage, StageScope};
use crate::state::{ConversationState, string_list};

use super::{context_summary, enhanced_slots};

const DEFAULT_INTENT: &str = "general_inquiry";

/// Normalises the rewritten utterance and extracts intent and slots.
///
/// Default output: the rewritten text as-is, the configured default intent,
/// and only the slots the conversation already knows.
pub struct PreprocessingStage {
    descriptor: StageDescriptor,
    client: Arc<DynReasoningClient>,
}

impl PreprocessingStage {
    pub fn new(descriptor: StageDescriptor, client: Arc<DynReasoningClient>) -> Self {
        Self { descriptor, client }
    }

    fn default_intent(&self) -> &str {
        self.descriptor
            .setting_str("default_intent")
            .unwrap_or(DEFAULT_INTENT)
    }

    fn build_prompt(&self, text: &str, input: &Value, scope: &StageScope<'_>) -> String {
        let topic = str_field(input, "topic").unwrap_or_default();
        [
            "이전 대화:".to_string(),
            context_summary(input, self.descriptor.setting_usize("max_context_entries")),
            String::new(),
            "현재 상태:".to_string(),
            scope.context.state.describe(),
            String::new(),
            "가능한 의도:".to_string(),
            bullet_list(self.descriptor.setting_object("intents")),
            String::new(),
            format!("주제: {topic}"),
            request_line(text),
            String::new(),
            "문장을 정규화하고 의도 하나와 슬롯 값(계좌번호, 금액, 수신인 등)을 추출하세요.".to_string(),
            "다음 JSON 형식으로만 답하세요:".to_string(),
            r#"{"normalized_text": "정규화된 문장", "intent": "의도", "slot": ["슬롯 값"], "context_used": false}"#
                .to_string(),
        ]
        .join("\n")
    }
}

#[async_trait]
impl Stage for PreprocessingStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn process(&self, input: &Value, scope: &StageScope<'_>) -> Result<Value, StageError> {
        let text = str_field(input, "rewritten_text").unwrap_or_default();
        let prompt = self.build_prompt(text, input, scope);
        let reply = self
            .client
            .complete(&self.descriptor.system_prompt, &prompt)
            .await?;

        let parsed = parse_json_object(&reply)?;
        let normalized = parsed
            .get("normalized_text")
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(text);
        // Some models answer with a ranked list; the first entry wins.
        let intent = match parsed.get("intent") {
            Some(Value::String(intent)) if !intent.trim().is_empty() => intent.trim(),
            Some(Value::Array(items)) => items
                .iter()
                .find_map(Value::as_str)
                .unwrap_or(self.default_intent()),
            _ => self.default_intent(),
        };
        let slots = enhanced_slots(string_list(parsed.get("slot")), input, &scope.context.state);

        Ok(json!({
            "normalized_text": normalized,
            "intent": intent,
            "slot": slots,
            "context_used": parsed.get("context_used").and_then(Value::as_bool).unwrap_or(false),
        }))
    }

    fn default_output(&self, input: &Value, scope: &StageScope<'_>) -> Value {
        json!({
            "normalized_text": str_field(input, "rewritten_text").unwrap_or_default(),
            "intent": self.default_intent(),
            "slot": enhanced_slots(Vec::new(), input, &scope.context.state),
            "context_used": false,
        })
    }

    fn handoff(&self, output: &Value, turn: &TurnInput) -> Value {
        let mut next = turn.carry();
        next.insert(
            "normalized_text".into(),
            output.get("normalized_text").cloned().unwrap_or_else(|| json!("")),
        );
        next.insert(
            "intent".into(),
            output.get("intent").cloned().unwrap_or_else(|| json!(DEFAULT_INTENT)),
        );
        next.insert(
            "slot".into(),
            output.get("slot").cloned().unwrap_or_else(|| json!([])),
        );
        Value::Object(next)
    }

    fn apply_state(&self, output: &Value, state: &mut ConversationState) {
        state.last_intent = str_field(output, "intent").map(str::to_string);
        state.last_slots = string_list(output.get("slot")).into_iter().collect();
    }
}
