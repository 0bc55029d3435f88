//! Banking tool execution.
//!
//! The domain stage selects a tool by name; the executor runs it and hands back
//! a JSON payload that is stored verbatim as the stage's `tool_output`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ToolError(pub String);

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool_name: &str, input: &Value) -> Result<Value, ToolError>;

    /// Names of the tools this executor can run, for prompt construction.
    fn tool_names(&self) -> Vec<String>;
}

/// Canned responses keyed by tool name. Account tools echo the requested
/// account number when the caller supplies one.
#[derive(Debug, Clone)]
pub struct StaticToolExecutor {
    table: BTreeMap<String, Value>,
}

const ACCOUNT_TOOLS: &[&str] = &["account_balance", "account_info", "transaction_history"];

impl StaticToolExecutor {
    pub fn empty() -> Self {
        Self {
            table: BTreeMap::new(),
        }
    }

    pub fn builtin() -> Self {
        Self::empty()
            .with_tool(
                "account_balance",
                json!({
                    "status": "success",
                    "account_number": "110-123-456789",
                    "balance": "1,500,000원",
                    "currency": "KRW",
                    "last_updated": "2024-01-15 14:30:00"
                }),
            )
            .with_tool(
                "account_info",
                json!({
                    "status": "success",
                    "account_number": "110-123-456789",
                    "account_type": "입출금 통장",
                    "opened_at": "2019-03-02",
                    "response": "입출금 통장으로 정상 이용 중입니다."
                }),
            )
            .with_tool(
                "transaction_history",
                json!({
                    "status": "success",
                    "account_number": "110-123-456789",
                    "transactions": [
                        { "date": "2024-01-14", "description": "급여", "amount": "+3,200,000원" },
                        { "date": "2024-01-15", "description": "관리비", "amount": "-250,000원" }
                    ],
                    "response": "최근 거래 2건을 조회했습니다."
                }),
            )
            .with_tool(
                "transfer_money",
                json!({
                    "status": "success",
                    "transaction_id": "TXN123456789",
                    "amount": "100,000원",
                    "recipient": "김철수"
                }),
            )
            .with_tool(
                "loan_info",
                json!({
                    "available_loan_amount": "50,000,000원",
                    "interest_rate": "연 4.5%"
                }),
            )
            .with_tool(
                "investment_info",
                json!({
                    "products": ["정기예금", "적립식 펀드", "채권형 펀드"],
                    "current_rates": { "정기예금": "연 3.5%", "적립식 펀드": "연 5.2%(예상)" }
                }),
            )
            .with_tool(
                "exchange_rate",
                json!({
                    "currency": "USD",
                    "exchange_rate": "1,330원",
                    "converted_amount": "752달러"
                }),
            )
            .with_tool(
                "auto_transfer",
                json!({
                    "status": "success",
                    "amount": "500,000원",
                    "schedule": "매월 25일",
                    "recipient": "관리비 계좌"
                }),
            )
            .with_tool(
                "service_condition",
                json!({
                    "conditions": "만 19세 이상 개인 고객이라면 가입할 수 있습니다.",
                    "requirements": ["신분증", "재직증명서"],
                    "fees": "면제"
                }),
            )
            .with_tool(
                "general_inquiry",
                json!({
                    "response": "일반 문의에 대한 답변입니다.",
                    "category": "general"
                }),
            )
    }

    pub fn with_tool(mut self, name: impl Into<String>, response: Value) -> Self {
        self.table.insert(name.into(), response);
        self
    }
}

impl Default for StaticToolExecutor {
    fn default() -> Self {
        Self::builtin()
    }
}

#[async_trait]
impl ToolExecutor for StaticToolExecutor {
    async fn execute(&self, tool_name: &str, input: &Value) -> Result<Value, ToolError> {
        let Some(response) = self.table.get(tool_name) else {
            debug!(tool = tool_name, "unknown tool requested");
            return Ok(json!({ "error": "Unknown tool", "tool_name": tool_name }));
        };

        let mut output = response.clone();
        if ACCOUNT_TOOLS.contains(&tool_name) {
            if let (Some(requested), Some(map)) = (
                input.get("account_number").and_then(Value::as_str),
                output.as_object_mut(),
            ) {
                map.insert("account_number".into(), Value::String(requested.to_string()));
            }
        }
        Ok(output)
    }

    fn tool_names(&self) -> Vec<String> {
        self.table.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests;
