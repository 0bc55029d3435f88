use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::ReasoningError;
use crate::pipeline::prompt::{INTENT_LINE_PREFIX, REQUEST_LINE_PREFIX};

use super::ReasoningClient;

/// Keyword-driven stand-in for the reasoning service.
///
/// Recognises which stage is asking from the JSON keys its prompt requests and
/// answers from a fixed banking vocabulary. Used by `--offline` runs and tests.
#[derive(Debug, Clone, Default)]
pub struct OfflineReasoningClient;

struct Profile {
    keywords: &'static [&'static str],
    topic: &'static str,
    intent: &'static str,
    domain: &'static str,
    tool: &'static str,
}

// Order matters: the first matching profile wins.
const PROFILES: &[Profile] = &[
    Profile {
        keywords: &["자동이체", "auto transfer"],
        topic: "banking",
        intent: "auto_transfer",
        domain: "transfer",
        tool: "auto_transfer",
    },
    Profile {
        keywords: &["잔액", "통장", "계좌", "balance"],
        topic: "account",
        intent: "check_balance",
        domain: "account",
        tool: "account_balance",
    },
    Profile {
        keywords: &["송금", "이체", "보내", "transfer"],
        topic: "banking",
        intent: "transfer_money",
        domain: "transfer",
        tool: "transfer_money",
    },
    Profile {
        keywords: &["대출", "담보", "이자", "loan"],
        topic: "loan",
        intent: "loan_inquiry",
        domain: "loan",
        tool: "loan_info",
    },
    Profile {
        keywords: &["투자", "펀드", "예금", "적금", "invest"],
        topic: "investment",
        intent: "investment_inquiry",
        domain: "investment",
        tool: "investment_info",
    },
    Profile {
        keywords: &["환율", "환전", "달러", "exchange"],
        topic: "exchange",
        intent: "exchange_rate",
        domain: "exchange",
        tool: "exchange_rate",
    },
    Profile {
        keywords: &["조건", "수수료", "서류", "fee"],
        topic: "banking",
        intent: "service_condition",
        domain: "general",
        tool: "service_condition",
    },
];

const DIRECT_ANSWER: &str = "안녕하세요! 저는 은행 업무를 도와드리는 상담 도우미입니다. \
계좌 조회, 이체, 대출, 투자 상품에 대해 편하게 물어보세요.";

impl OfflineReasoningClient {
    pub fn new() -> Self {
        Self
    }

    fn by_keywords(text: &str) -> Option<&'static Profile> {
        let lowered = text.to_lowercase();
        PROFILES
            .iter()
            .find(|profile| profile.keywords.iter().any(|kw| lowered.contains(kw)))
    }

    fn by_intent(intent: &str) -> Option<&'static Profile> {
        PROFILES.iter().find(|profile| profile.intent == intent)
    }

    fn answer(user_prompt: &str) -> String {
        let request = line_value(user_prompt, REQUEST_LINE_PREFIX).unwrap_or(user_prompt);
        let intent = line_value(user_prompt, INTENT_LINE_PREFIX);
        let profile = intent
            .and_then(Self::by_intent)
            .or_else(|| Self::by_keywords(request));

        let reply: Value = if user_prompt.contains("\"tool_name\"") {
            json!({
                "tool_name": profile.map_or("general_inquiry", |p| p.tool),
                "tool_input": {},
                "reasoning": "offline keyword routing"
            })
        } else if user_prompt.contains("\"target_domain\"") {
            json!({
                "target_domain": profile.map_or("general", |p| p.domain),
                "routing_reasoning": "offline keyword routing"
            })
        } else if user_prompt.contains("\"intent\"") {
            json!({
                "normalized_text": request,
                "intent": profile.map_or("general_inquiry", |p| p.intent),
                "slot": entity_tokens(request),
                "context_used": false
            })
        } else if user_prompt.contains("\"rewritten_text\"") {
            json!({
                "rewritten_text": request,
                "topic": profile.map_or("general", |p| p.topic),
                "is_general": profile.is_none(),
                "context_used": false
            })
        } else {
            return DIRECT_ANSWER.to_string();
        };

        reply.to_string()
    }
}

#[async_trait]
impl ReasoningClient for OfflineReasoningClient {
    async fn complete(&self, _system_prompt: &str, user_prompt: &str) -> Result<String, ReasoningError> {
        Ok(Self::answer(user_prompt))
    }
}

fn line_value<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    text.lines()
        .find_map(|line| line.trim().strip_prefix(prefix))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Account-number-like tokens (digits joined by dashes).
fn entity_tokens(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_ascii_digit() && c != '-'))
        .filter(|token| token.contains('-') && token.chars().any(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .collect()
}
