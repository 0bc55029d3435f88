use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::client::DynReasoningClient;
use crate::error::StageError;
use crate::pipeline::context::TurnInput;
use crate::pipeline::descriptor::StageDescriptor;
use crate::pipeline::prompt::{
    bullet_list, intent_line, parse_json_object, request_line, str_field,
};
use crate::pipeline::stage::{Stage, StageScope};

use super::{context_summary, slot_line};

const DEFAULT_DOMAIN: &str = "general";

/// Picks the business domain that should serve the request.
///
/// Default output: the domain mapped from the intent by
/// `intent_domain_mapping`, else `default_domain`.
pub struct SupervisorStage {
    descriptor: StageDescriptor,
    client: Arc<DynReasoningClient>,
}

impl SupervisorStage {
    pub fn new(descriptor: StageDescriptor, client: Arc<DynReasoningClient>) -> Self {
        Self { descriptor, client }
    }

    fn mapped_domain(&self, intent: &str) -> String {
        self.descriptor
            .setting_object("intent_domain_mapping")
            .and_then(|mapping| mapping.get(intent))
            .and_then(Value::as_str)
            .or_else(|| self.descriptor.setting_str("default_domain"))
            .unwrap_or(DEFAULT_DOMAIN)
            .to_string()
    }

    fn build_prompt(&self, input: &Value) -> String {
        [
            "이전 대화:".to_string(),
            context_summary(input, self.descriptor.setting_usize("max_context_entries")),
            String::new(),
            "처리 가능한 도메인:".to_string(),
            bullet_list(self.descriptor.setting_object("domains")),
            String::new(),
            request_line(str_field(input, "normalized_text").unwrap_or_default()),
            intent_line(str_field(input, "intent").unwrap_or_default()),
            slot_line(input),
            String::new(),
            "요청을 처리할 도메인 하나를 고르세요.".to_string(),
            "다음 JSON 형식으로만 답하세요:".to_string(),
            r#"{"target_domain": "도메인", "routing_reasoning": "선택 이유"}"#.to_string(),
        ]
        .join("\n")
    }

    fn output(&self, input: &Value, domain: &str, reasoning: &str) -> Value {
        json!({
            "target_domain": domain,
            "routing_reasoning": reasoning,
            "normalized_text": input.get("normalized_text").cloned().unwrap_or_else(|| json!("")),
            "intent": input.get("intent").cloned().unwrap_or_else(|| json!("")),
            "slot": input.get("slot").cloned().unwrap_or_else(|| json!([])),
        })
    }
}

#[async_trait]
impl Stage for SupervisorStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn process(&self, input: &Value, _scope: &StageScope<'_>) -> Result<Value, StageError> {
        let reply = self
            .client
            .complete(&self.descriptor.system_prompt, &self.build_prompt(input))
            .await?;

        let parsed = parse_json_object(&reply)?;
        let domain = parsed
            .get("target_domain")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|domain| !domain.is_empty())
            .ok_or_else(|| StageError::ResponseParse("missing target_domain".into()))?;
        let reasoning = parsed
            .get("routing_reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default();

        Ok(self.output(input, domain, reasoning))
    }

    fn default_output(&self, input: &Value, _scope: &StageScope<'_>) -> Value {
        let intent = str_field(input, "intent").unwrap_or_default();
        let domain = self.mapped_domain(intent);
        self.output(input, &domain, &format!("기본 매핑: {intent} -> {domain}"))
    }

    fn handoff(&self, output: &Value, turn: &TurnInput) -> Value {
        let mut next = turn.carry();
        for key in ["target_domain", "normalized_text", "intent", "slot"] {
            if let Some(value) = output.get(key) {
                next.insert(key.into(), value.clone());
            }
        }
        Value::Object(next)
    }
}
