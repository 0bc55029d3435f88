use serde_json::json;

use super::*;

#[tokio::test]
async fn returns_canned_balance() {
    let tools = StaticToolExecutor::builtin();
    let output = tools.execute("account_balance", &json!({})).await.unwrap();
    assert_eq!(output["balance"], "1,500,000원");
    assert_eq!(output["account_number"], "110-123-456789");
}

#[tokio::test]
async fn account_tools_echo_requested_account() {
    let tools = StaticToolExecutor::builtin();
    let output = tools
        .execute("account_balance", &json!({ "account_number": "333-22-1111" }))
        .await
        .unwrap();
    assert_eq!(output["account_number"], "333-22-1111");
}

#[tokio::test]
async fn non_account_tools_ignore_input() {
    let tools = StaticToolExecutor::builtin();
    let output = tools
        .execute("loan_info", &json!({ "account_number": "333-22-1111" }))
        .await
        .unwrap();
    assert!(output.get("account_number").is_none());
}

#[tokio::test]
async fn unknown_tool_yields_error_payload() {
    let tools = StaticToolExecutor::empty();
    let output = tools.execute("teleport", &json!({})).await.unwrap();
    assert_eq!(output["error"], "Unknown tool");
    assert_eq!(output["tool_name"], "teleport");
}

#[test]
fn lists_registered_tools() {
    let names = StaticToolExecutor::empty()
        .with_tool("b", json!({}))
        .with_tool("a", json!({}))
        .tool_names();
    assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
}
