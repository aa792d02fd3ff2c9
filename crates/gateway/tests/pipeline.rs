//! Intent detection, confirmation and primary execution against a stubbed
//! HTTP MCP server.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use {
    mockito::Matcher,
    serde_json::json,
    toolgate_common::{Classify, ErrorKind, ManualClock},
    toolgate_config::ToolgateConfig,
    toolgate_gateway::{
        ExecutionPath, HostError, McpHost, MessageOutcome, ToolRequest, Verification,
    },
    toolgate_intent::{ConfirmationStatus, IntentKind},
    toolgate_mcp::{ServerRecord, TransportKind},
};

const TOOLS: &str = r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[
    {"name":"send_email","description":"Send an email","inputSchema":{"type":"object","required":["to","body"],"properties":{"to":{"type":"string"},"body":{"type":"string"}}}}
]}}"#;

fn record(id: &str, name: &str, uri: &str) -> ServerRecord {
    serde_json::from_value(json!({
        "id": id,
        "name": name,
        "config": {"type": "custom", "uri": uri}
    }))
    .unwrap()
}

async fn mail_server() -> mockito::ServerGuard {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"method": "tools/list"})))
        .with_header("content-type", "application/json")
        .with_body(TOOLS)
        .create_async()
        .await;
    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"method": "tools/call"})))
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"{\"message_id\":\"msg-42\",\"status\":\"sent\"}"}]}}"#,
        )
        .create_async()
        .await;
    server
}

#[tokio::test]
async fn detect_confirm_execute() {
    let mail = mail_server().await;
    let host = McpHost::in_memory(&ToolgateConfig::default(), ManualClock::starting_now()).unwrap();
    let server = host
        .register_server("u1", record("s1", "Gmail", &mail.url()))
        .unwrap();
    assert_eq!(server.transport, TransportKind::Http);

    let MessageOutcome::ConfirmationRequired {
        confirmation,
        prompt,
    } = host
        .handle_message("u1", "send an email to bob@example.com")
        .unwrap()
    else {
        panic!("expected a confirmation request");
    };
    assert_eq!(confirmation.intent_kind, IntentKind::Email);
    assert_eq!(confirmation.candidate_servers.len(), 1);
    assert!(prompt.contains(&format!("confirm {}", confirmation.confirmation_id)));

    let reply = format!("confirm {}", confirmation.confirmation_id);
    let MessageOutcome::Resolved(resolution) = host.handle_message("u1", &reply).unwrap() else {
        panic!("expected the reply to resolve the confirmation");
    };
    assert!(resolution.is_confirmed());
    assert!(resolution.notice.contains("Executing Action"));

    // Single use.
    let err = host.handle_message("u1", &reply).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfirmationAlreadyResolved);

    let tools = host
        .candidate_tools("u1", &resolution.confirmation)
        .await;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "send_email");

    let outcome = host
        .execute_tool(
            "u1",
            ToolRequest {
                server_id: "s1".into(),
                tool: "send_email".into(),
                arguments: json!({"to": "bob@example.com", "body": "hi"}),
                intent: Some(IntentKind::Email),
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(outcome.path, ExecutionPath::Primary);
    assert_eq!(outcome.verification, Verification::Verified {
        message_id: "msg-42".into()
    });
    assert!(outcome.fallback.is_none());
}

#[tokio::test]
async fn cancel_reply_cancels() {
    let mail = mail_server().await;
    let host = McpHost::in_memory(&ToolgateConfig::default(), ManualClock::starting_now()).unwrap();
    host.register_server("u1", record("s1", "Gmail", &mail.url()))
        .unwrap();

    let MessageOutcome::ConfirmationRequired { confirmation, .. } =
        host.handle_message("u1", "send an email to bob").unwrap()
    else {
        panic!("expected a confirmation request");
    };

    // Another user cannot see it.
    let reply = format!("cancel {}", confirmation.confirmation_id);
    let err = host.handle_message("u2", &reply).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfirmationNotFound);

    let MessageOutcome::Resolved(resolution) = host.handle_message("u1", &reply).unwrap() else {
        panic!("expected the reply to resolve the confirmation");
    };
    assert!(!resolution.is_confirmed());
    assert_eq!(resolution.confirmation.status, ConfirmationStatus::Cancelled);
    assert!(resolution.notice.contains("Action Cancelled"));
}

#[tokio::test]
async fn expired_confirmation_asks_to_restate() {
    let mail = mail_server().await;
    let clock = ManualClock::starting_now();
    let host = McpHost::in_memory(&ToolgateConfig::default(), clock.clone()).unwrap();
    host.register_server("u1", record("s1", "Gmail", &mail.url()))
        .unwrap();

    let MessageOutcome::ConfirmationRequired { confirmation, .. } =
        host.handle_message("u1", "send an email to bob").unwrap()
    else {
        panic!("expected a confirmation request");
    };
    clock.advance(std::time::Duration::from_secs(301));

    let err = host
        .handle_message("u1", &format!("confirm {}", confirmation.confirmation_id))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfirmationExpired);
    let HostError::Confirmation { intent, .. } = &err else {
        panic!("expected a confirmation error");
    };
    assert_eq!(*intent, Some(IntentKind::Email));
    let text = err.user_message();
    assert!(text.contains("make your request again"));
    assert!(text.contains("Email"));
}

#[tokio::test]
async fn invalid_arguments_are_rejected_before_the_call() {
    let mail = mail_server().await;
    let host = McpHost::in_memory(&ToolgateConfig::default(), ManualClock::starting_now()).unwrap();
    host.register_server("u1", record("s1", "Gmail", &mail.url()))
        .unwrap();

    let err = host
        .execute_tool(
            "u1",
            ToolRequest {
                server_id: "s1".into(),
                tool: "send_email".into(),
                arguments: json!({"body": "no recipient"}),
                intent: Some(IntentKind::Email),
            },
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaValidationFailed);
    assert!(err.user_message().contains("send_email"));

    let err = host
        .execute_tool(
            "u1",
            ToolRequest {
                server_id: "s1".into(),
                tool: "does_not_exist".into(),
                arguments: json!({}),
                intent: None,
            },
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ToolNotFound);
}

#[tokio::test]
async fn unverified_email_result_is_flagged() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"method": "tools/list"})))
        .with_header("content-type", "application/json")
        .with_body(TOOLS)
        .create_async()
        .await;
    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"method": "tools/call"})))
        .with_header("content-type", "application/json")
        .with_body(r#"{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"done"}]}}"#)
        .create_async()
        .await;

    let host = McpHost::in_memory(&ToolgateConfig::default(), ManualClock::starting_now()).unwrap();
    host.register_server("u1", record("s1", "Gmail", &server.url()))
        .unwrap();
    let outcome = host
        .execute_tool(
            "u1",
            ToolRequest {
                server_id: "s1".into(),
                tool: "send_email".into(),
                arguments: json!({"to": "bob@example.com", "body": "hi"}),
                intent: None,
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(outcome.verification, Verification::Unverified);
    assert_eq!(outcome.text, "done");
}

#[test]
fn setup_guide_when_no_server_matches() {
    let host = McpHost::in_memory(&ToolgateConfig::default(), ManualClock::starting_now()).unwrap();
    host.register_server("u1", record("s1", "Weather", "https://weather.example.com/mcp"))
        .unwrap();
    let MessageOutcome::SetupRequired { intent, prompt } =
        host.handle_message("u1", "send an email to bob").unwrap()
    else {
        panic!("expected the setup guide");
    };
    assert_eq!(intent.kind, IntentKind::Email);
    assert!(prompt.contains("gmail"));
}
