//! Stdio transport: spawn a child process and speak line-delimited JSON-RPC
//! over its stdin/stdout.

use std::{
    collections::HashMap,
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    async_trait::async_trait,
    serde_json::Value,
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        process::{Child, Command},
        sync::{Mutex, mpsc},
        task::JoinHandle,
    },
    tracing::{debug, info, trace, warn},
};

use crate::{
    error::{Context, Error, Result},
    pending::PendingRequests,
    registry::TransportKind,
    traits::{Headers, McpTransport},
    types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse},
};

pub struct StdioTransport {
    command: String,
    child: Mutex<Child>,
    outbound: mpsc::UnboundedSender<String>,
    pending: PendingRequests,
    alive: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl StdioTransport {
    /// Spawn the server process and start the reader and writer loops.
    pub fn spawn(command: &str, args: &[String], env: &HashMap<String, String>) -> Result<Self> {
        info!(command, args = ?args, "spawning MCP server process");

        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ConnectionRefused {
                target: command.to_string(),
                reason: e.to_string(),
            })?;

        let mut stdin = child.stdin.take().context("failed to capture stdin")?;
        let stdout = child.stdout.take().context("failed to capture stdout")?;
        let stderr = child.stderr.take();

        let pending = PendingRequests::new();
        let alive = Arc::new(AtomicBool::new(true));
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let mut tasks = Vec::with_capacity(3);

        if let Some(stderr) = stderr {
            let command = command.to_string();
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        warn!(command = %command, stderr = %trimmed, "MCP server stderr");
                    }
                }
            }));
        }

        // Lines are written whole by this task, so an abandoned call cannot
        // leave a partial line on stdin.
        {
            let alive = Arc::clone(&alive);
            tasks.push(tokio::spawn(async move {
                while let Some(line) = outbound_rx.recv().await {
                    let written = async {
                        stdin.write_all(line.as_bytes()).await?;
                        stdin.flush().await
                    }
                    .await;
                    if let Err(e) = written {
                        warn!(error = %e, "failed to write to MCP server stdin");
                        break;
                    }
                }
                alive.store(false, Ordering::Release);
            }));
        }

        {
            let alive = Arc::clone(&alive);
            let pending = pending.clone();
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            let trimmed = line.trim();
                            if trimmed.is_empty() {
                                continue;
                            }
                            trace!(raw = %trimmed, "MCP server -> client");
                            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                                Ok(resp) if resp.result.is_some() || resp.error.is_some() => {
                                    pending.complete(resp);
                                },
                                Ok(_) => trace!("ignoring server notification"),
                                Err(e) => {
                                    debug!(error = %e, line = %trimmed, "MCP server sent non-response line");
                                },
                            }
                        },
                        Ok(None) => {
                            debug!("MCP server stdout closed");
                            break;
                        },
                        Err(e) => {
                            warn!(error = %e, "error reading from MCP server stdout");
                            break;
                        },
                    }
                }
                alive.store(false, Ordering::Release);
                pending.fail_all();
            }));
        }

        Ok(Self {
            command: command.to_string(),
            child: Mutex::new(child),
            outbound,
            pending,
            alive,
            tasks,
        })
    }

    fn send_line(&self, payload: &impl serde::Serialize) -> Result<()> {
        let mut line = serde_json::to_string(payload)?;
        line.push('\n');
        self.outbound
            .send(line)
            .map_err(|_| Error::lost(&self.command, "stdin writer stopped"))
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        _headers: &Headers,
    ) -> Result<JsonRpcResponse> {
        let id = self.pending.next_id();
        let req = JsonRpcRequest::new(id, method, params);
        let slot = self.pending.register(req.id.to_string());
        if !self.alive.load(Ordering::Acquire) {
            return Err(Error::lost(&self.command, "process exited"));
        }
        debug!(method, id, command = %self.command, "client -> MCP server (stdio)");
        self.send_line(&req)?;

        slot.wait()
            .await
            .ok_or_else(|| Error::lost(&self.command, "process exited while waiting for response"))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        trace!(method, "client -> MCP server (notification)");
        self.send_line(&JsonRpcNotification::new(method, params))
    }

    async fn is_alive(&self) -> bool {
        if !self.alive.load(Ordering::Acquire) {
            return false;
        }
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::Release);
        for task in &self.tasks {
            task.abort();
        }
        self.pending.fail_all();
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            debug!(command = %self.command, error = %e, "kill failed");
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, std::time::Duration};

    /// Rewrites each request line into a response with the same id.
    fn sed_responder() -> StdioTransport {
        StdioTransport::spawn(
            "sed",
            &[
                "-u".to_string(),
                r#"s/"method".*$/"result":{"ok":true}}/"#.to_string(),
            ],
            &HashMap::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn request_roundtrip() {
        let transport = sed_responder();
        let resp = transport.request("tools/list", None, &[]).await.unwrap();
        assert_eq!(resp.result.unwrap()["ok"], true);
        assert_eq!(resp.id, serde_json::json!(1));
        let resp = transport.request("tools/list", None, &[]).await.unwrap();
        assert_eq!(resp.id, serde_json::json!(2));
    }

    #[tokio::test]
    async fn close_kills_process() {
        let transport = StdioTransport::spawn("cat", &[], &HashMap::new()).unwrap();
        assert!(transport.is_alive().await);
        transport.close().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!transport.is_alive().await);
        let err = transport.request("tools/list", None, &[]).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost { .. }));
    }

    #[tokio::test]
    async fn exit_fails_pending_request() {
        let transport = StdioTransport::spawn("true", &[], &HashMap::new()).unwrap();
        let result = transport.request("tools/list", None, &[]).await;
        assert!(matches!(result, Err(Error::ConnectionLost { .. })));
    }

    #[tokio::test]
    async fn missing_binary_is_refused() {
        let result = StdioTransport::spawn("nonexistent_command_xyz_42", &[], &HashMap::new());
        assert!(matches!(result, Err(Error::ConnectionRefused { .. })));
    }
}
