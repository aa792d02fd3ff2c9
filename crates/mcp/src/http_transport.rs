//! Plain HTTP transport: one JSON-RPC POST per request.
//!
//! Servers may answer with `application/json` or a single-shot
//! `text/event-stream`; both are accepted. A `Mcp-Session-Id` returned by
//! the server is echoed on later requests.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use {
    async_trait::async_trait,
    reqwest::{Client, StatusCode},
    serde_json::Value,
    tokio::sync::RwLock,
    tracing::{debug, warn},
};

use crate::{
    error::{Error, Result},
    registry::TransportKind,
    traits::{Headers, McpTransport},
    types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION},
};

pub(crate) const MCP_PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
pub(crate) const MCP_SESSION_ID_HEADER: &str = "Mcp-Session-Id";
pub(crate) const STREAMABLE_ACCEPT_HEADER: &str = "application/json, text/event-stream";

pub struct HttpTransport {
    client: Client,
    url: String,
    read_timeout: Duration,
    session_id: RwLock<Option<String>>,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(client: Client, url: &str, read_timeout: Duration) -> Self {
        Self {
            client,
            url: url.to_string(),
            read_timeout,
            session_id: RwLock::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    async fn post(
        &self,
        method: &str,
        body: &impl serde::Serialize,
        headers: &Headers,
    ) -> Result<reqwest::Response> {
        let mut req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", STREAMABLE_ACCEPT_HEADER)
            .header(MCP_PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION);
        if let Some(session_id) = self.session_id.read().await.clone() {
            req = req.header(MCP_SESSION_ID_HEADER, session_id);
        }
        for (name, value) in headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let response = req
            .json(body)
            .send()
            .await
            .map_err(|e| Error::from_reqwest(&self.url, method, e, self.read_timeout))?;
        self.store_session_id_from_response(&response).await;
        Ok(response)
    }

    async fn store_session_id_from_response(&self, response: &reqwest::Response) {
        let Some(session_id) = response
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|raw| raw.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return;
        };

        let mut slot = self.session_id.write().await;
        if slot.as_deref() != Some(session_id) {
            debug!(url = %self.url, session_id, "updated MCP session id");
            *slot = Some(session_id.to_string());
        }
    }
}

/// Map a non-success HTTP status onto the taxonomy.
pub(crate) fn status_error(url: &str, method: &str, status: StatusCode, body: &str) -> Error {
    match status {
        StatusCode::UNAUTHORIZED => Error::ReauthRequired { provider: None },
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            Error::lost(url, format!("HTTP {status}"))
        },
        _ => Error::invalid(method, format!("HTTP {status}: {body}")),
    }
}

pub(crate) fn response_is_event_stream(resp: &reqwest::Response) -> bool {
    resp.headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|base| base.trim() == "text/event-stream")
}

/// Extract the first JSON-RPC response from an event-stream body.
pub(crate) fn parse_event_stream_response(body: &str, method: &str) -> Result<JsonRpcResponse> {
    let mut data = String::new();

    for line in body.lines() {
        let trimmed = line.trim_end();
        if let Some(rest) = trimmed.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
            continue;
        }

        if trimmed.is_empty() && !data.is_empty() {
            if let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&data) {
                return Ok(resp);
            }
            data.clear();
        }
    }

    if !data.is_empty()
        && let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&data)
    {
        return Ok(resp);
    }

    Err(Error::invalid(method, "no JSON-RPC response in event stream"))
}

/// Read a successful HTTP response body as JSON-RPC.
pub(crate) async fn read_rpc_response(
    url: &str,
    method: &str,
    response: reqwest::Response,
    budget: Duration,
) -> Result<JsonRpcResponse> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(url, method, status, &body));
    }
    let event_stream = response_is_event_stream(&response);
    let body = response
        .text()
        .await
        .map_err(|e| Error::from_reqwest(url, method, e, budget))?;
    if event_stream {
        parse_event_stream_response(&body, method)
    } else {
        serde_json::from_str(&body).map_err(|e| Error::invalid(method, e.to_string()))
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        headers: &Headers,
    ) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        debug!(method, id, url = %self.url, "client -> MCP server (http)");

        let response = self.post(method, &req, headers).await?;
        read_rpc_response(&self.url, method, response, self.read_timeout).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notif = JsonRpcNotification::new(method, params);
        let response = self.post(method, &notif, &[]).await?;
        if !response.status().is_success() {
            warn!(method, status = %response.status(), "notification returned non-success");
        }
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        true
    }

    async fn close(&self) {
        let Some(session_id) = self.session_id.write().await.take() else {
            return;
        };
        let result = self
            .client
            .delete(&self.url)
            .timeout(Duration::from_secs(5))
            .header(MCP_PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION)
            .header(MCP_SESSION_ID_HEADER, session_id)
            .send()
            .await;
        if let Err(e) = result {
            debug!(url = %self.url, error = %e, "failed to close MCP session");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        toolgate_common::{Classify, ErrorKind},
    };

    fn transport(url: &str) -> HttpTransport {
        HttpTransport::new(Client::new(), url, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn json_response_with_auth_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("authorization", "Bearer tok")
            .match_header("accept", STREAMABLE_ACCEPT_HEADER)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#)
            .create_async()
            .await;

        let headers = vec![("Authorization".to_string(), "Bearer tok".to_string())];
        let resp = transport(&server.url())
            .request("tools/list", None, &headers)
            .await
            .unwrap();
        assert!(resp.result.is_some());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn event_stream_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "text/event-stream; charset=utf-8")
            .with_body("event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}\n\n")
            .create_async()
            .await;

        let resp = transport(&server.url())
            .request("tools/call", None, &[])
            .await
            .unwrap();
        assert_eq!(resp.result.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn session_id_is_echoed() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("mcp-session-id", "sess-1")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
            .create_async()
            .await;
        let second = server
            .mock("POST", "/")
            .match_header("mcp-session-id", "sess-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":2,"result":{}}"#)
            .create_async()
            .await;

        let t = transport(&server.url());
        t.request("initialize", None, &[]).await.unwrap();
        t.request("tools/list", None, &[]).await.unwrap();
        assert_eq!(t.session_id().await.as_deref(), Some("sess-1"));
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn status_codes_map_to_kinds() {
        let mut server = mockito::Server::new_async().await;
        let _unauth = server
            .mock("POST", "/auth")
            .with_status(401)
            .create_async()
            .await;
        let _bad_gateway = server
            .mock("POST", "/flaky")
            .with_status(502)
            .create_async()
            .await;

        let err = transport(&format!("{}/auth", server.url()))
            .request("tools/call", None, &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReauthRequired);

        let err = transport(&format!("{}/flaky", server.url()))
            .request("tools/call", None, &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionLost);
    }

    #[tokio::test]
    async fn unreachable_is_connection_refused() {
        let err = transport("http://127.0.0.1:1/mcp")
            .request("tools/list", None, &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
    }

    #[test]
    fn event_stream_without_payload_is_invalid() {
        let err = parse_event_stream_response("event: ping\n\n", "tools/list").unwrap_err();
        assert!(matches!(err, Error::InvalidResponse { .. }));
    }
}
