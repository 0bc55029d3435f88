use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::client::DynReasoningClient;
use crate::error::StageError;
use crate::pipeline::descriptor::StageDescriptor;
use crate::pipeline::prompt::{
    bullet_list, intent_line, looks_like_account, parse_json_object, request_line, str_field,
};
use crate::pipeline::stage::{Stage, StageScope};
use crate::state::{ConversationState, string_list};
use crate::tools::ToolExecutor;

use super::{context_summary, enhanced_slots, slot_line};

const DEFAULT_TOOL: &str = "general_inquiry";
const DEGRADED_RESPONSE: &str =
    "죄송합니다. 요청을 처리하는 중 문제가 발생했습니다. 잠시 후 다시 시도해 주세요.";
const ACCOUNT_TOOLS: &[&str] = &["account_balance", "account_info", "transaction_history"];

/// Selects a tool for the request, fills its input from the conversation,
/// and runs it.
///
/// An unparseable selection falls back to `intent_tool_mapping` and still runs
/// the tool. Default output when retries run out: `general_inquiry` with a
/// generic apology and no tool call.
pub struct DomainStage {
    descriptor: StageDescriptor,
    client: Arc<DynReasoningClient>,
    tools: Arc<dyn ToolExecutor>,
}

struct Selection {
    tool_name: String,
    tool_input: Map<String, Value>,
    reasoning: String,
}

impl DomainStage {
    pub fn new(
        descriptor: StageDescriptor,
        client: Arc<DynReasoningClient>,
        tools: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            descriptor,
            client,
            tools,
        }
    }

    fn tool_catalog(&self) -> String {
        if let Some(described) = self.descriptor.setting_object("tools") {
            return bullet_list(Some(described));
        }
        self.tools
            .tool_names()
            .iter()
            .map(|name| format!("- {name}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn build_prompt(&self, input: &Value, scope: &StageScope<'_>) -> String {
        let mapping = self
            .descriptor
            .setting_object("intent_tool_mapping")
            .map(|mapping| {
                mapping
                    .iter()
                    .map(|(intent, tool)| format!("- {intent} -> {}", tool.as_str().unwrap_or("")))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        [
            "이전 대화:".to_string(),
            context_summary(input, self.descriptor.setting_usize("max_context_entries")),
            String::new(),
            "현재 상태:".to_string(),
            scope.context.state.describe(),
            String::new(),
            "사용 가능한 도구:".to_string(),
            self.tool_catalog(),
            String::new(),
            "의도별 기본 도구:".to_string(),
            mapping,
            String::new(),
            format!("도메인: {}", str_field(input, "target_domain").unwrap_or_default()),
            request_line(str_field(input, "normalized_text").unwrap_or_default()),
            intent_line(str_field(input, "intent").unwrap_or_default()),
            slot_line(input),
            String::new(),
            "요청을 처리할 도구 하나와 그 입력값을 고르세요.".to_string(),
            "다음 JSON 형식으로만 답하세요:".to_string(),
            r#"{"tool_name": "도구 이름", "tool_input": {}, "reasoning": "선택 이유"}"#.to_string(),
        ]
        .join("\n")
    }

    fn mapped_selection(&self, intent: &str) -> Selection {
        let tool_name = self
            .descriptor
            .setting_object("intent_tool_mapping")
            .and_then(|mapping| mapping.get(intent))
            .and_then(Value::as_str)
            .or_else(|| self.descriptor.setting_str("default_tool"))
            .unwrap_or(DEFAULT_TOOL)
            .to_string();
        Selection {
            reasoning: format!("기본 매핑에 따른 도구 선택: {intent} -> {tool_name}"),
            tool_name,
            tool_input: Map::new(),
        }
    }

    async fn select(&self, input: &Value, scope: &StageScope<'_>) -> Result<Selection, StageError> {
        let intent = str_field(input, "intent").unwrap_or_default();
        let reply = self
            .client
            .complete(&self.descriptor.system_prompt, &self.build_prompt(input, scope))
            .await?;

        let parsed = match parse_json_object(&reply) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(error = %err, intent, "tool selection unparseable, using intent mapping");
                return Ok(self.mapped_selection(intent));
            }
        };
        let Some(tool_name) = parsed
            .get("tool_name")
            .and_then(Value::as_str)
            .filter(|name| !name.trim().is_empty())
        else {
            warn!(intent, "tool selection names no tool, using intent mapping");
            return Ok(self.mapped_selection(intent));
        };

        Ok(Selection {
            tool_name: tool_name.trim().to_string(),
            tool_input: parsed
                .get("tool_input")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            reasoning: parsed
                .get("reasoning")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    fn is_account_tool(&self, tool_name: &str) -> bool {
        match self
            .descriptor
            .settings
            .get("account_tools")
            .and_then(Value::as_array)
        {
            Some(configured) => configured.iter().any(|tool| tool.as_str() == Some(tool_name)),
            None => ACCOUNT_TOOLS.contains(&tool_name),
        }
    }

    /// Slot names the tool needs that its input does not carry.
    fn missing_slots(&self, tool_name: &str, tool_input: &Map<String, Value>) -> Vec<String> {
        let required = self
            .descriptor
            .setting_object("required_slots")
            .and_then(|required| required.get(tool_name));
        string_list(required)
            .into_iter()
            .filter(|slot| tool_input.get(slot).is_none_or(Value::is_null))
            .collect()
    }
}

#[async_trait]
impl Stage for DomainStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn process(&self, input: &Value, scope: &StageScope<'_>) -> Result<Value, StageError> {
        let mut selection = self.select(input, scope).await?;
        let slots = enhanced_slots(string_list(input.get("slot")), input, &scope.context.state);

        if self.is_account_tool(&selection.tool_name)
            && !selection.tool_input.contains_key("account_number")
        {
            let account = slots
                .iter()
                .find(|slot| looks_like_account(slot))
                .cloned()
                .or_else(|| scope.context.state.selected_entity.clone());
            if let Some(account) = account {
                debug!(tool = %selection.tool_name, %account, "filled account_number from context");
                selection
                    .tool_input
                    .insert("account_number".into(), Value::String(account));
            }
        }

        let tool_input = Value::Object(selection.tool_input.clone());
        let tool_output = self
            .tools
            .execute(&selection.tool_name, &tool_input)
            .await
            .map_err(|err| StageError::Tool {
                tool: selection.tool_name.clone(),
                message: err.to_string(),
            })?;
        let missing = self.missing_slots(&selection.tool_name, &selection.tool_input);

        Ok(json!({
            "tool_name": selection.tool_name,
            "tool_input": tool_input,
            "tool_output": tool_output,
            "enhanced_slots": slots,
            "missing_slots": missing,
            "reasoning": selection.reasoning,
        }))
    }

    fn default_output(&self, input: &Value, scope: &StageScope<'_>) -> Value {
        json!({
            "tool_name": DEFAULT_TOOL,
            "tool_input": {},
            "tool_output": { "response": DEGRADED_RESPONSE },
            "enhanced_slots": enhanced_slots(string_list(input.get("slot")), input, &scope.context.state),
            "missing_slots": [],
            "reasoning": "degraded",
        })
    }

    fn apply_state(&self, output: &Value, state: &mut ConversationState) {
        let account = ["tool_output", "tool_input"].iter().find_map(|section| {
            output
                .get(*section)
                .and_then(|value| value.get("account_number"))
                .and_then(Value::as_str)
        });
        if let Some(account) = account {
            state.selected_entity = Some(account.to_string());
        }

        let missing: BTreeSet<String> = string_list(output.get("missing_slots")).into_iter().collect();
        state.pending_action = if missing.is_empty() {
            None
        } else {
            str_field(output, "tool_name").map(str::to_string)
        };
        state.missing_slots = missing;
    }
}
