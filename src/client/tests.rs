use httpmock::prelude::*;
use serde_json::{Value, json};

use super::*;
use crate::config::{LlmProvider, LlmSettings};

fn settings(base_url: String) -> LlmSettings {
    LlmSettings {
        provider: LlmProvider::OpenAi,
        api_key: "test-key".to_string(),
        timeout_secs: 5,
        base_url,
        user_agent: "teller/test".to_string(),
        model: "gpt-test".to_string(),
        temperature: 0.7,
    }
}

fn completion(content: &str) -> Value {
    json!({
        "choices": [
            {
                "index": 0,
                "finish_reason": "stop",
                "message": { "role": "assistant", "content": content }
            }
        ]
    })
}

#[tokio::test]
async fn complete_sends_system_and_user_messages() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("Authorization", "Bearer test-key")
                .json_body(json!({
                    "model": "gpt-test",
                    "messages": [
                        { "role": "system", "content": "you rewrite" },
                        { "role": "user", "content": "잔액 알려줘" }
                    ],
                    "temperature": 0.7
                }));
            then.status(200)
                .json_body(completion("{\"rewritten_text\":\"잔액 조회\"}"));
        })
        .await;

    let client = AIClient::new(&settings(server.url("/v1"))).unwrap();
    let reply = client.complete("you rewrite", "잔액 알려줘").await.unwrap();

    mock.assert_async().await;
    assert_eq!(reply, "{\"rewritten_text\":\"잔액 조회\"}");
}

#[tokio::test]
async fn whitespace_reply_is_an_empty_result() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).json_body(completion("   \n"));
        })
        .await;

    let client = AIClient::new(&settings(server.url("/v1"))).unwrap();
    let err = client.complete("s", "u").await.unwrap_err();
    assert!(matches!(err, ReasoningError::Empty));
}

#[tokio::test]
async fn unauthorized_maps_to_status_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(401).body("nope");
        })
        .await;

    let client = AIClient::new(&settings(server.url("/v1"))).unwrap();
    match client.complete("s", "u").await.unwrap_err() {
        ReasoningError::Status { status, message } => {
            assert_eq!(status, 401);
            assert!(message.contains("Invalid API key"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn server_errors_are_reported_with_status() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(503);
        })
        .await;

    let client = AIClient::new(&settings(server.url("/v1"))).unwrap();
    let err = client.complete("s", "u").await.unwrap_err();
    assert!(matches!(err, ReasoningError::Status { status: 503, .. }));
}

#[tokio::test]
async fn offline_client_routes_balance_question() {
    let client = OfflineReasoningClient::new();

    let rewriting = client
        .complete("", "Return \"rewritten_text\".\n사용자 요청: 계좌 잔액 확인해줘")
        .await
        .unwrap();
    let rewriting: Value = serde_json::from_str(&rewriting).unwrap();
    assert_eq!(rewriting["topic"], "account");
    assert_eq!(rewriting["is_general"], false);

    let domain = client
        .complete("", "Return \"tool_name\".\n사용자 요청: 잔액\n의도: check_balance")
        .await
        .unwrap();
    let domain: Value = serde_json::from_str(&domain).unwrap();
    assert_eq!(domain["tool_name"], "account_balance");
}

#[tokio::test]
async fn offline_client_marks_small_talk_as_general() {
    let client = OfflineReasoningClient::new();
    let reply = client
        .complete("", "Return \"rewritten_text\".\n사용자 요청: 오늘 날씨 어때?")
        .await
        .unwrap();
    let reply: Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(reply["topic"], "general");
    assert_eq!(reply["is_general"], true);

    let direct = client.complete("answer kindly", "사용자 질문: 오늘 날씨 어때?").await.unwrap();
    assert!(!direct.trim().is_empty());
}

#[tokio::test]
async fn offline_preprocessing_extracts_account_numbers() {
    let client = OfflineReasoningClient::new();
    let reply = client
        .complete("", "Return \"intent\".\n사용자 요청: 110-123-456789 계좌로 이체해줘")
        .await
        .unwrap();
    let reply: Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(reply["slot"], json!(["110-123-456789"]));
}

#[test]
fn extract_json_skips_think_blocks_and_prose() {
    let raw = "<think>{\"draft\": true}</think>Sure! ```json\n{\"a\": {\"b\": \"}\"}}\n``` done";
    assert_eq!(
        extract_json_object(raw).as_deref(),
        Some("{\"a\": {\"b\": \"}\"}}")
    );
}

#[test]
fn extract_json_returns_none_without_object() {
    assert_eq!(extract_json_object("no json here"), None);
    assert_eq!(extract_json_object("{ unterminated"), None);
}

#[test]
fn build_client_honours_offline_provider() {
    let mut offline = settings("http://localhost".to_string());
    offline.provider = LlmProvider::Offline;
    assert!(build_client(&offline).is_ok());
}
