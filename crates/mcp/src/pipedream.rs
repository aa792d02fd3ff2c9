//! Pipedream-hosted MCP workflows.
//!
//! Pipedream speaks plain HTTP JSON-RPC but expects an `initialize` session
//! negotiation first, reports argument problems as successful text results,
//! and signals missing account connections through OAuth hints.

use std::time::Duration;

use {
    async_trait::async_trait,
    reqwest::Client,
    serde_json::{Map, Value},
    tokio::sync::OnceCell,
    toolgate_common::Classify,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    http_transport::HttpTransport,
    registry::TransportKind,
    traits::{Headers, McpTransport},
    types::{InitializeParams, JsonRpcResponse, ToolsCallResult},
};

pub const PIPEDREAM_PREFIX: &str = "https://mcp.pipedream.net/";

const ARGUMENT_ERROR_MARKER: &str = "Error parsing arguments";

/// Default `instruction` for tools that fail without one.
const DEFAULT_INSTRUCTIONS: &[(&str, &str)] = &[
    ("google_drive-list-files", "List all files in the root directory"),
    ("google_drive-find-file", "Find files by name or type"),
    ("google_drive-find-folder", "Find folders by name"),
    ("google_drive-search-shared-drives", "List all shared drives"),
    ("google_drive-list-access-proposals", "List pending access proposals"),
    ("gmail-send-email", "Send an email with the specified content"),
    ("mcp_Gmail_gmail-send-email", "Send an email with the specified content"),
    ("youtube-search", "Search for videos or get video information"),
    ("youtube-get-video-info", "Search for videos or get video information"),
];

#[must_use]
pub fn is_pipedream_url(uri: &str) -> bool {
    if uri.starts_with(PIPEDREAM_PREFIX) {
        return true;
    }
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.ends_with("pipedream.net")))
        .unwrap_or(false)
}

/// Fill in a default `instruction` for known tools when the caller left it out.
#[must_use]
pub fn enhance_arguments(tool: &str, arguments: Value) -> Value {
    let Some((_, instruction)) = DEFAULT_INSTRUCTIONS.iter().find(|(name, _)| *name == tool) else {
        return arguments;
    };
    let mut map = match arguments {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => return other,
    };
    if !map.contains_key("instruction") {
        debug!(tool, "adding default instruction argument");
        map.insert("instruction".into(), Value::String((*instruction).to_string()));
    }
    Value::Object(map)
}

/// Whether a JSON-RPC error message or result payload asks for an account
/// connection.
#[must_use]
pub fn oauth_signal(response: &JsonRpcResponse) -> bool {
    if let Some(err) = &response.error
        && err.message.to_ascii_lowercase().contains("oauth")
    {
        return true;
    }
    response.result.as_ref().is_some_and(|result| {
        ["oauth_url", "auth_url"]
            .iter()
            .any(|field| result.get(*field).is_some_and(|v| !v.is_null()))
    })
}

/// Pipedream reports bad arguments as a successful text result.
#[must_use]
pub fn argument_error(tool: &str, result: &ToolsCallResult) -> Option<Error> {
    let text = result.first_text()?;
    if !text.contains(ARGUMENT_ERROR_MARKER) {
        return None;
    }
    let mut errors = vec![text.to_string()];
    if text.contains("instruction") && text.contains("Required") {
        errors.push(
            "this tool needs an 'instruction' argument; describe what it should do more specifically"
                .into(),
        );
    }
    Some(Error::SchemaValidation {
        tool: tool.to_string(),
        errors,
    })
}

/// HTTP transport plus a one-time `initialize` per pooled connection.
pub struct PipedreamTransport {
    http: HttpTransport,
    negotiated: OnceCell<()>,
}

impl PipedreamTransport {
    pub fn new(client: Client, url: &str, read_timeout: Duration) -> Self {
        Self {
            http: HttpTransport::new(client, url, read_timeout),
            negotiated: OnceCell::new(),
        }
    }

    async fn negotiate(&self, headers: &Headers) -> Result<()> {
        self.negotiated
            .get_or_try_init(|| async {
                let params = serde_json::to_value(InitializeParams::default())?;
                match self.http.request("initialize", Some(params), headers).await {
                    Ok(_) => {
                        info!(url = %self.http.url(), "Pipedream session negotiated");
                        Ok(())
                    },
                    Err(e) if e.kind().triggers_fallback() || e.kind().needs_user_action() => Err(e),
                    Err(e) => {
                        // Some workflows reject initialize but still serve tools.
                        warn!(url = %self.http.url(), error = %e, "Pipedream initialize rejected, continuing");
                        Ok(())
                    },
                }
            })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl McpTransport for PipedreamTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Pipedream
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        headers: &Headers,
    ) -> Result<JsonRpcResponse> {
        if method != "initialize" {
            self.negotiate(headers).await?;
        }
        self.http.request(method, params, headers).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.http.notify(method, params).await
    }

    async fn is_alive(&self) -> bool {
        true
    }

    async fn close(&self) {
        self.http.close().await;
    }
}
