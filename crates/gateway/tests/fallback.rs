//! The primary path fails (timeout, unhealthy gate) and the email fallback
//! takes over.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    axum::{Json, Router, routing::post},
    serde_json::{Value, json},
    toolgate_common::{Classify, ErrorKind, ManualClock},
    toolgate_config::ToolgateConfig,
    toolgate_fallback::{FallbackExecutor, MailTransport, SmtpEmailFallback},
    toolgate_gateway::{ExecutionPath, HostError, McpHost, ToolRequest, Verification},
    toolgate_intent::IntentKind,
    toolgate_mcp::{AuthRequirement, ServerConfig, TransportKind},
};

#[derive(Default)]
struct StubMailer {
    sent: Mutex<Vec<lettre::Message>>,
    fail: bool,
}

#[async_trait]
impl MailTransport for StubMailer {
    async fn send(&self, message: lettre::Message) -> toolgate_fallback::Result<()> {
        if self.fail {
            return Err(toolgate_fallback::Error::message("relay rejected the message"));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// JSON-RPC stub that lists one tool immediately and sleeps on `tools/call`.
async fn slow_server(delay: Duration) -> String {
    let app = Router::new().route(
        "/mcp",
        post(move |Json(req): Json<Value>| async move {
            let id = req["id"].clone();
            let result = match req["method"].as_str() {
                Some("tools/call") => {
                    tokio::time::sleep(delay).await;
                    json!({"content": [{"type": "text", "text": "sent"}]})
                },
                _ => json!({"tools": [{"name": "send_email", "inputSchema": {"type": "object"}}]}),
            };
            Json(json!({"jsonrpc": "2.0", "id": id, "result": result}))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/mcp")
}

fn server(id: &str, transport: TransportKind, endpoint: &str) -> ServerConfig {
    ServerConfig {
        id: id.into(),
        owner_id: "u1".into(),
        name: "Gmail".into(),
        description: None,
        transport,
        endpoint: endpoint.into(),
        auth: AuthRequirement::None,
        env: HashMap::new(),
    }
}

fn host(mailer: Arc<StubMailer>) -> McpHost {
    let mut config = ToolgateConfig::default();
    config.timeouts.connect_secs = 1;
    config.timeouts.read_secs = 1;
    config.timeouts.probe_secs = 1;
    McpHost::in_memory(&config, ManualClock::starting_now())
        .unwrap()
        .with_fallback(FallbackExecutor::new().with_strategy(
            IntentKind::Email,
            Arc::new(SmtpEmailFallback::with_transport(mailer, "bot@example.com")),
        ))
}

fn send_request(server_id: &str, intent: Option<IntentKind>) -> ToolRequest {
    ToolRequest {
        server_id: server_id.into(),
        tool: "send_email".into(),
        arguments: json!({"to": "bob@example.com", "subject": "Hi", "body": "hello"}),
        intent,
    }
}

#[tokio::test]
async fn timeout_falls_back_to_smtp() {
    let endpoint = slow_server(Duration::from_secs(5)).await;
    let mailer = Arc::new(StubMailer::default());
    let host = host(Arc::clone(&mailer));
    host.servers()
        .upsert(server("s1", TransportKind::Http, &endpoint))
        .unwrap();

    let started = std::time::Instant::now();
    let outcome = host
        .execute_tool("u1", send_request("s1", None), None)
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(4));

    assert_eq!(outcome.path, ExecutionPath::Fallback);
    assert!(matches!(outcome.verification, Verification::Verified { .. }));
    let action = outcome.fallback.unwrap();
    assert_eq!(action.strategy, "smtp");
    assert_eq!(mailer.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn timeout_without_strategy_surfaces() {
    let endpoint = slow_server(Duration::from_secs(5)).await;
    let host = host(Arc::new(StubMailer::default()));
    host.servers()
        .upsert(server("s1", TransportKind::Http, &endpoint))
        .unwrap();

    let err = host
        .execute_tool("u1", send_request("s1", Some(IntentKind::Calendar)), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn failed_fallback_reports_both_causes() {
    let endpoint = slow_server(Duration::from_secs(5)).await;
    let host = host(Arc::new(StubMailer {
        fail: true,
        ..Default::default()
    }));
    host.servers()
        .upsert(server("s1", TransportKind::Http, &endpoint))
        .unwrap();

    let err = host
        .execute_tool("u1", send_request("s1", Some(IntentKind::Email)), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FallbackFailed);
    let HostError::FallbackFailed { original, fallback } = &err else {
        panic!("expected FallbackFailed");
    };
    assert_eq!(original.kind(), ErrorKind::Timeout);
    assert!(fallback.to_string().contains("relay rejected"));
    let text = err.user_message();
    assert!(text.contains("Primary error"));
    assert!(text.contains("relay rejected"));
}

#[tokio::test]
async fn unhealthy_pipedream_server_skips_the_call() {
    // Reserve a port, then free it so nothing listens there.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mailer = Arc::new(StubMailer::default());
    let host = host(Arc::clone(&mailer));
    host.servers()
        .upsert(server("pd", TransportKind::Pipedream, &format!("http://{addr}/")))
        .unwrap();

    let outcome = host
        .execute_tool("u1", send_request("pd", Some(IntentKind::Email)), None)
        .await
        .unwrap();
    assert_eq!(outcome.path, ExecutionPath::Fallback);
    assert_eq!(mailer.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn cancellation_does_not_fall_back() {
    let endpoint = slow_server(Duration::from_secs(5)).await;
    let mailer = Arc::new(StubMailer::default());
    let host = host(Arc::clone(&mailer));
    host.servers()
        .upsert(server("s1", TransportKind::Http, &endpoint))
        .unwrap();

    // Warm the tool cache so the cancellation lands on tools/call.
    host.discover_tools("u1", "s1", false).await.unwrap();

    let cancel = tokio_util::sync::CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });
    let err = host
        .execute_tool("u1", send_request("s1", Some(IntentKind::Email)), Some(cancel))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(mailer.sent.lock().unwrap().is_empty());
}
