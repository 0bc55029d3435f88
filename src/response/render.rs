use serde_json::Value;

use crate::session::CustomerInfo;
use crate::state::ConversationState;

use super::FinalPayload;

pub const DIRECT_RESPONSE_TOOL: &str = "direct_response";
pub const EMPTY_DIRECT_RESPONSE: &str = "죄송합니다. 답변을 생성하는 중 오류가 발생했습니다.";

/// Placeholder name meaning "no name known"; no greeting prefix is added.
const ANONYMOUS: &str = "고객";
const UNKNOWN: &str = "알 수 없음";

/// Turns a final payload into the Korean answer text, one template per tool.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseRenderer;

impl ResponseRenderer {
    pub fn new() -> Self {
        Self
    }

    pub fn render(
        &self,
        payload: &FinalPayload,
        customer: &CustomerInfo,
        state: &ConversationState,
    ) -> String {
        let (name, output) = match payload {
            FinalPayload::Direct(text) => {
                return if text.trim().is_empty() {
                    EMPTY_DIRECT_RESPONSE.to_string()
                } else {
                    text.clone()
                };
            }
            FinalPayload::Tool { name, output } => (name.as_str(), output),
        };

        let customer_name = customer
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.trim().is_empty() && *name != ANONYMOUS);
        let greet = |body: String| match customer_name {
            Some(customer_name) => format!("{customer_name}님, {body}"),
            None => body,
        };
        let field = |key: &str, fallback: &str| -> String {
            match output.get(key) {
                Some(Value::String(text)) => text.clone(),
                Some(Value::Null) | None => fallback.to_string(),
                Some(other) => other.to_string(),
            }
        };
        let succeeded = output.get("status").and_then(Value::as_str) == Some("success");

        match name {
            "account_balance" => {
                let account = match output.get("account_number").and_then(Value::as_str) {
                    Some(account) => account.to_string(),
                    None => state
                        .selected_entity
                        .clone()
                        .unwrap_or_else(|| "현재 계좌".to_string()),
                };
                greet(format!(
                    "{account}의 현재 잔액은 {}입니다.",
                    field("balance", UNKNOWN)
                ))
            }
            "transfer_money" if succeeded => greet(format!(
                "{}에게 {} 송금이 완료되었습니다.",
                field("recipient", ""),
                field("amount", "0")
            )),
            "transfer_money" => "송금 처리 중 오류가 발생했습니다.".to_string(),
            "loan_info" => greet(format!(
                "대출 가능 금액은 {}이며, 현재 이자율은 {}입니다.",
                field("available_loan_amount", UNKNOWN),
                field("interest_rate", UNKNOWN)
            )),
            "investment_info" => {
                let products = string_items(output.get("products")).join(", ");
                let rates = output
                    .get("current_rates")
                    .and_then(Value::as_object)
                    .map(|rates| {
                        rates
                            .iter()
                            .map(|(product, rate)| {
                                format!("{product} {}", rate.as_str().unwrap_or(UNKNOWN))
                            })
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_default();
                greet(format!("투자 가능한 상품: {products}. 현재 금리: {rates}"))
            }
            "exchange_rate" => greet(format!(
                "{} 환율은 {}이며, 환전 금액은 {}입니다.",
                field("currency", ""),
                field("exchange_rate", UNKNOWN),
                field("converted_amount", UNKNOWN)
            )),
            "auto_transfer" if succeeded => greet(format!(
                "{}에게 {} {} 자동이체가 등록되었습니다.",
                field("recipient", ""),
                field("amount", "0"),
                field("schedule", "")
            )),
            "auto_transfer" => "자동이체 등록 중 오류가 발생했습니다.".to_string(),
            "service_condition" => {
                let mut body = field("conditions", "서비스 이용 조건을 확인해주세요.");
                let requirements = string_items(output.get("requirements"));
                if !requirements.is_empty() {
                    body.push_str(&format!(" 필요 서류: {}", requirements.join(", ")));
                }
                let fees = field("fees", "");
                if !fees.is_empty() {
                    body.push_str(&format!(" 수수료: {fees}"));
                }
                greet(body)
            }
            _ => {
                let body = match output.get("response") {
                    Some(Value::String(text)) => text.clone(),
                    _ => output.to_string(),
                };
                greet(body)
            }
        }
    }
}

fn string_items(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| match item.as_str() {
                    Some(text) => text.to_string(),
                    None => item.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}
