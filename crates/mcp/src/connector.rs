//! TransportConnector: dispatch, connection pooling, timeouts, the single
//! transparent retry and cancellation.

use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use {
    dashmap::DashMap,
    reqwest::Client,
    serde_json::Value,
    tokio::time::{Instant as Deadline, timeout_at},
    tokio_util::sync::CancellationToken,
    toolgate_common::{Classify, ErrorKind, KeyedLocks},
    toolgate_config::TimeoutsConfig,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use toolgate_metrics::{counter, histogram, mcp as mcp_metrics};

use crate::{
    error::{Error, Result},
    http_transport::HttpTransport,
    pipedream::{self, PipedreamTransport},
    registry::{ServerConfig, TransportKind},
    sse_transport::SseTransport,
    stdio_transport::StdioTransport,
    traits::McpTransport,
    types::{
        InitializeParams, InitializeResult, JsonRpcResponse, McpToolDef, ToolsCallParams,
        ToolsCallResult, ToolsListResult,
    },
    ws_transport::WebSocketTransport,
};

/// JSON-RPC "invalid params".
const INVALID_PARAMS: i64 = -32602;

/// Upper bound for any deadline, so a huge configured timeout cannot
/// overflow `Instant`.
const MAX_BUDGET: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(budget: Duration) -> Deadline {
    let now = Deadline::now();
    now.checked_add(budget.min(MAX_BUDGET))
        .or_else(|| now.checked_add(MAX_BUDGET))
        .unwrap_or(now)
}

type PoolKey = (String, TransportKind);

#[derive(Debug, Clone, Copy)]
pub struct CallTimeouts {
    pub connect: Duration,
    /// Read timeout, also the overall budget for one call.
    pub read: Duration,
    pub probe: Duration,
}

impl From<&TimeoutsConfig> for CallTimeouts {
    fn from(config: &TimeoutsConfig) -> Self {
        Self {
            connect: config.connect(),
            read: config.read(),
            probe: config.probe(),
        }
    }
}

/// Per-call extras: auth headers and a caller cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub headers: Vec<(String, String)>,
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    #[must_use]
    pub fn with_headers(headers: Vec<(String, String)>) -> Self {
        Self {
            headers,
            cancel: None,
        }
    }

    #[must_use]
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

pub struct TransportConnector {
    client: Client,
    timeouts: CallTimeouts,
    pool: DashMap<PoolKey, Arc<dyn McpTransport>>,
    connect_locks: KeyedLocks<PoolKey>,
}

impl TransportConnector {
    pub fn new(timeouts: CallTimeouts) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .build()
            .map_err(|e| Error::external("failed to build HTTP client", e))?;
        Ok(Self::with_client(client, timeouts))
    }

    #[must_use]
    pub fn with_client(client: Client, timeouts: CallTimeouts) -> Self {
        Self {
            client,
            timeouts,
            pool: DashMap::new(),
            connect_locks: KeyedLocks::new(),
        }
    }

    #[must_use]
    pub fn timeouts(&self) -> CallTimeouts {
        self.timeouts
    }

    /// Number of pooled connections.
    #[must_use]
    pub fn pooled(&self) -> usize {
        self.pool.len()
    }

    /// Invoke `tools/call` on `server`.
    pub async fn call_tool(
        &self,
        server: &ServerConfig,
        tool: &str,
        arguments: Value,
        options: &CallOptions,
    ) -> Result<ToolsCallResult> {
        let started = Instant::now();
        let arguments = if server.transport == TransportKind::Pipedream {
            pipedream::enhance_arguments(tool, arguments)
        } else {
            arguments
        };
        let params = serde_json::to_value(ToolsCallParams {
            name: tool.to_string(),
            arguments,
        })?;

        let result = match self.dispatch(server, "tools/call", Some(params), options).await {
            Ok(response) => interpret_call(server, tool, response),
            Err(e) => Err(e),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => debug!(server_id = %server.id, tool, elapsed_ms, "tool call succeeded"),
            Err(e) => warn!(
                server_id = %server.id,
                tool,
                elapsed_ms,
                kind = %e.kind(),
                error = %e,
                "tool call failed"
            ),
        }

        #[cfg(feature = "metrics")]
        {
            let transport = server.transport.as_str();
            let status = if result.is_ok() { "ok" } else { "error" };
            counter!(mcp_metrics::TOOL_CALLS_TOTAL, "transport" => transport, "status" => status)
                .increment(1);
            histogram!(mcp_metrics::TOOL_CALL_DURATION_SECONDS, "transport" => transport)
                .record(started.elapsed().as_secs_f64());
            if let Err(e) = &result {
                counter!(
                    mcp_metrics::TOOL_CALL_ERRORS_TOTAL,
                    "transport" => transport,
                    "kind" => e.kind().as_str()
                )
                .increment(1);
            }
        }

        result
    }

    /// Invoke `tools/list` on `server`.
    pub async fn list_tools(
        &self,
        server: &ServerConfig,
        options: &CallOptions,
    ) -> Result<Vec<McpToolDef>> {
        let response = self.dispatch(server, "tools/list", None, options).await?;
        if let Some(err) = response.error {
            return Err(Error::Rpc(err));
        }
        let result = response
            .result
            .ok_or_else(|| Error::invalid("tools/list", "response has no result"))?;
        let listed: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| Error::invalid("tools/list", e.to_string()))?;
        debug!(server_id = %server.id, count = listed.tools.len(), "fetched MCP tools");
        Ok(listed.tools)
    }

    /// A lightweight `tools/list` under the probe budget. No retry.
    pub async fn probe(&self, server: &ServerConfig) -> Result<()> {
        let deadline = deadline_after(self.timeouts.probe);
        let budget = self.timeouts.probe;
        let never = CancellationToken::new();
        let transport = guard("connect", budget, deadline, &never, self.connect(server)).await?;
        let result = guard(
            "tools/list",
            budget,
            deadline,
            &never,
            transport.request("tools/list", None, &[]),
        )
        .await;
        match result {
            Ok(response) => match response.error {
                // An RPC-level error still proves the server is answering.
                Some(err) => {
                    debug!(server_id = %server.id, code = err.code, "probe answered with error");
                    Ok(())
                },
                None => Ok(()),
            },
            Err(e) => {
                let hung = e.kind() == ErrorKind::Timeout && transport.kind() == TransportKind::Stdio;
                if e.kind().is_transport() || hung {
                    self.evict(&server.id, &transport).await;
                }
                Err(e)
            },
        }
    }

    /// Close and forget every pooled connection for a server.
    pub async fn close_server(&self, server_id: &str) {
        let keys: Vec<PoolKey> = self
            .pool
            .iter()
            .filter(|entry| entry.key().0 == server_id)
            .map(|entry| entry.key().clone())
            .collect();
        for key in keys {
            if let Some((_, transport)) = self.pool.remove(&key) {
                transport.close().await;
            }
            self.connect_locks.forget(&key);
        }
    }

    /// Close every pooled connection.
    pub async fn shutdown(&self) {
        let keys: Vec<PoolKey> = self.pool.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, transport)) = self.pool.remove(&key) {
                transport.close().await;
            }
        }
    }

    /// Send one request, retrying once on a fresh connection after a
    /// transport-level failure. The whole exchange shares one deadline.
    async fn dispatch(
        &self,
        server: &ServerConfig,
        method: &str,
        params: Option<Value>,
        options: &CallOptions,
    ) -> Result<JsonRpcResponse> {
        let deadline = deadline_after(self.timeouts.read);
        let cancel = options.cancel.clone().unwrap_or_default();

        match self
            .attempt(server, method, params.clone(), options, deadline, &cancel)
            .await
        {
            Err(e) if e.kind().is_transport() => {
                warn!(server_id = %server.id, method, error = %e, "transport error, retrying once");
                #[cfg(feature = "metrics")]
                counter!(mcp_metrics::TOOL_CALL_RETRIES_TOTAL, "transport" => server.transport.as_str())
                    .increment(1);
                self.attempt(server, method, params, options, deadline, &cancel)
                    .await
            },
            other => other,
        }
    }

    async fn attempt(
        &self,
        server: &ServerConfig,
        method: &str,
        params: Option<Value>,
        options: &CallOptions,
        deadline: Deadline,
        cancel: &CancellationToken,
    ) -> Result<JsonRpcResponse> {
        let budget = self.timeouts.read;
        let transport = guard(method, budget, deadline, cancel, self.connect(server)).await?;
        let result = guard(
            method,
            budget,
            deadline,
            cancel,
            transport.request(method, params, &options.headers),
        )
        .await;

        if let Err(e) = &result {
            let kind = e.kind();
            if kind.is_transport() {
                self.evict(&server.id, &transport).await;
            } else if kind == ErrorKind::Timeout && transport.kind() == TransportKind::Stdio {
                warn!(server_id = %server.id, "stdio server hung, killing process");
                self.evict(&server.id, &transport).await;
            }
        }
        result
    }

    /// Pooled connection for `server`, opening one if needed.
    async fn connect(&self, server: &ServerConfig) -> Result<Arc<dyn McpTransport>> {
        let key: PoolKey = (server.id.clone(), server.transport);
        if let Some(transport) = self.cached(&key).await {
            return Ok(transport);
        }

        let _gate = self.connect_locks.lock(&key).await;
        if let Some(transport) = self.cached(&key).await {
            return Ok(transport);
        }

        let transport = match timeout_at(deadline_after(self.timeouts.connect), self.open(server))
            .await
        {
            Ok(opened) => opened?,
            Err(_) => {
                return Err(Error::ConnectionRefused {
                    target: server.endpoint.clone(),
                    reason: format!(
                        "connect timed out after {}s",
                        self.timeouts.connect.as_secs()
                    ),
                });
            },
        };
        self.pool.insert(key, Arc::clone(&transport));

        #[cfg(feature = "metrics")]
        counter!(mcp_metrics::CONNECTIONS_OPENED_TOTAL, "transport" => server.transport.as_str())
            .increment(1);

        Ok(transport)
    }

    /// Live pooled transport for `key`; dead ones are dropped.
    async fn cached(&self, key: &PoolKey) -> Option<Arc<dyn McpTransport>> {
        let transport = self.pool.get(key).map(|entry| Arc::clone(entry.value()))?;
        if transport.is_alive().await {
            return Some(transport);
        }
        debug!(server_id = %key.0, transport = %key.1, "pooled connection is dead");
        self.evict(&key.0, &transport).await;
        None
    }

    async fn open(&self, server: &ServerConfig) -> Result<Arc<dyn McpTransport>> {
        let read = self.timeouts.read;
        let transport: Arc<dyn McpTransport> = match server.transport {
            TransportKind::Http => {
                Arc::new(HttpTransport::new(self.client.clone(), &server.endpoint, read))
            },
            TransportKind::Pipedream => Arc::new(PipedreamTransport::new(
                self.client.clone(),
                &server.endpoint,
                read,
            )),
            TransportKind::WebSocket => Arc::new(WebSocketTransport::connect(&server.endpoint).await?),
            TransportKind::Sse => {
                Arc::new(SseTransport::connect(self.client.clone(), &server.endpoint, read).await?)
            },
            TransportKind::Stdio => {
                let (program, args) = server.command_line()?;
                Arc::new(StdioTransport::spawn(&program, &args, &server.env)?)
            },
        };

        if server.transport.is_stateful()
            && let Err(e) = handshake(server, transport.as_ref()).await
        {
            warn!(server_id = %server.id, error = %e, "MCP initialize handshake failed");
            transport.close().await;
            return Err(e);
        }

        info!(server_id = %server.id, transport = %server.transport, "MCP connection opened");
        Ok(transport)
    }

    /// Drop `transport` from the pool if it is still the cached one, then close it.
    async fn evict(&self, server_id: &str, transport: &Arc<dyn McpTransport>) {
        let key: PoolKey = (server_id.to_string(), transport.kind());
        let removed = self
            .pool
            .remove_if(&key, |_, cached| {
                std::ptr::addr_eq(Arc::as_ptr(cached), Arc::as_ptr(transport))
            })
            .is_some();
        if removed {
            debug!(server_id, transport = %key.1, "evicted pooled connection");
            #[cfg(feature = "metrics")]
            counter!(mcp_metrics::CONNECTIONS_EVICTED_TOTAL, "transport" => key.1.as_str())
                .increment(1);
            transport.close().await;
        }
    }
}

/// Race `work` against the shared deadline and the caller's cancellation.
async fn guard<T>(
    method: &str,
    budget: Duration,
    deadline: Deadline,
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        outcome = timeout_at(deadline, work) => outcome.unwrap_or_else(|_| {
            Err(Error::Timeout {
                method: method.to_string(),
                after: budget,
            })
        }),
    }
}

async fn handshake(server: &ServerConfig, transport: &dyn McpTransport) -> Result<()> {
    let params = serde_json::to_value(InitializeParams::default())?;
    let response = transport.request("initialize", Some(params), &[]).await?;
    if let Some(err) = response.error {
        return Err(Error::Rpc(err));
    }
    match response.result.map(serde_json::from_value::<InitializeResult>) {
        Some(Ok(init)) => info!(
            server_id = %server.id,
            protocol = init.protocol_version.as_deref().unwrap_or("unknown"),
            server_name = init.server_info.as_ref().map(|s| s.name.as_str()).unwrap_or("unknown"),
            "MCP server initialized"
        ),
        _ => debug!(server_id = %server.id, "unrecognised initialize result, continuing"),
    }
    transport.notify("notifications/initialized", None).await
}

/// Turn a `tools/call` response into a result or a typed error.
fn interpret_call(
    server: &ServerConfig,
    tool: &str,
    response: JsonRpcResponse,
) -> Result<ToolsCallResult> {
    if pipedream::oauth_signal(&response) {
        return Err(Error::ReauthRequired {
            provider: server.auth.provider().map(|p| p.display_name()),
        });
    }
    if let Some(err) = response.error {
        if err.code == INVALID_PARAMS {
            return Err(Error::SchemaValidation {
                tool: tool.to_string(),
                errors: vec![err.message],
            });
        }
        return Err(Error::Rpc(err));
    }
    let result = response
        .result
        .ok_or_else(|| Error::invalid("tools/call", "response has no result"))?;
    let result: ToolsCallResult = serde_json::from_value(result)
        .map_err(|e| Error::invalid("tools/call", e.to_string()))?;

    if server.transport == TransportKind::Pipedream
        && let Some(err) = pipedream::argument_error(tool, &result)
    {
        return Err(err);
    }
    if result.is_error {
        return Err(Error::ToolFailed {
            tool: tool.to_string(),
            message: result.text(),
        });
    }
    Ok(result)
}
