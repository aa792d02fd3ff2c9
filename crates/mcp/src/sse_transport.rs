//! Server-Sent Events transport.
//!
//! A long-lived GET stream carries responses as `message` events; requests
//! go out through a companion POST to the URL announced by the first
//! `endpoint` event.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    futures::StreamExt,
    reqwest::Client,
    serde_json::Value,
    tokio::task::JoinHandle,
    tracing::{debug, trace, warn},
    url::Url,
};

use crate::{
    error::{Error, Result},
    http_transport::{read_rpc_response, status_error},
    pending::PendingRequests,
    registry::TransportKind,
    traits::{Headers, McpTransport},
    types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse},
};

/// One parsed server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` parser.
#[derive(Debug, Default)]
pub(crate) struct EventParser {
    buf: Vec<u8>,
}

impl EventParser {
    /// Feed raw bytes. Only complete blocks are decoded, so a multibyte
    /// character split across chunks waits for its tail.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);
        if self.buf.contains(&b'\r') {
            self.buf = strip_crlf(&self.buf);
        }
        let mut events = Vec::new();
        while let Some(end) = self.buf.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buf.drain(..end + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        events
    }
}

/// `\r\n` to `\n`. A trailing `\r` is kept until its `\n` arrives.
fn strip_crlf(buf: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(buf.len());
    let mut bytes = buf.iter().copied().peekable();
    while let Some(byte) = bytes.next() {
        if byte == b'\r' && bytes.peek() == Some(&b'\n') {
            continue;
        }
        out.push(byte);
    }
    out
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = String::from("message");
    let mut data = Vec::new();
    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = value.to_string(),
            "data" => data.push(value),
            _ => {},
        }
    }
    if data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}

pub struct SseTransport {
    client: Client,
    url: String,
    post_url: String,
    read_timeout: Duration,
    pending: PendingRequests,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl SseTransport {
    /// Open the event stream and wait for the `endpoint` announcement.
    pub async fn connect(client: Client, url: &str, read_timeout: Duration) -> Result<Self> {
        let base = Url::parse(url)?;
        let response = client
            .get(url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| Error::from_reqwest(url, "connect", e, read_timeout))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(url, "connect", status, &body));
        }

        let mut stream = Box::pin(response.bytes_stream());
        let mut parser = EventParser::default();
        let mut early = Vec::new();
        let post_url = 'found: loop {
            let Some(chunk) = stream.next().await else {
                return Err(Error::lost(url, "event stream closed before endpoint event"));
            };
            let chunk = chunk.map_err(|e| Error::lost(url, e))?;
            for event in parser.push(&chunk) {
                if event.event == "endpoint" {
                    break 'found base.join(event.data.trim())?;
                }
                early.push(event);
            }
        };
        debug!(url, post_url = %post_url, "SSE endpoint announced");

        let pending = PendingRequests::new();
        let alive = Arc::new(AtomicBool::new(true));
        for event in early {
            dispatch(&pending, &event);
        }

        let reader = {
            let pending = pending.clone();
            let alive = Arc::clone(&alive);
            let url = url.to_string();
            tokio::spawn(async move {
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(chunk) => {
                            for event in parser.push(&chunk) {
                                dispatch(&pending, &event);
                            }
                        },
                        Err(e) => {
                            warn!(url = %url, error = %e, "SSE stream error");
                            break;
                        },
                    }
                }
                debug!(url = %url, "SSE stream closed");
                alive.store(false, Ordering::Release);
                pending.fail_all();
            })
        };

        Ok(Self {
            client,
            url: url.to_string(),
            post_url: post_url.to_string(),
            read_timeout,
            pending,
            alive,
            reader,
        })
    }

    async fn post(
        &self,
        method: &str,
        body: &impl serde::Serialize,
        headers: &Headers,
    ) -> Result<reqwest::Response> {
        let mut req = self
            .client
            .post(&self.post_url)
            .header("Content-Type", "application/json");
        for (name, value) in headers {
            req = req.header(name.as_str(), value.as_str());
        }
        req.json(body)
            .send()
            .await
            .map_err(|e| Error::from_reqwest(&self.post_url, method, e, self.read_timeout))
    }
}

fn dispatch(pending: &PendingRequests, event: &SseEvent) {
    if event.event != "message" {
        trace!(event = %event.event, "ignoring SSE event");
        return;
    }
    match serde_json::from_str::<JsonRpcResponse>(&event.data) {
        Ok(resp) if resp.result.is_some() || resp.error.is_some() => {
            pending.complete(resp);
        },
        Ok(_) => trace!("ignoring server notification"),
        Err(e) => debug!(error = %e, "SSE message is not a JSON-RPC response"),
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        headers: &Headers,
    ) -> Result<JsonRpcResponse> {
        let id = self.pending.next_id();
        let req = JsonRpcRequest::new(id, method, params);
        let slot = self.pending.register(req.id.to_string());
        if !self.alive.load(Ordering::Acquire) {
            return Err(Error::lost(&self.url, "event stream closed"));
        }
        debug!(method, id, url = %self.post_url, "client -> MCP server (sse)");

        let response = self.post(method, &req, headers).await?;
        let answered_inline = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| {
                ct.starts_with("application/json") || ct.starts_with("text/event-stream")
            });
        if !response.status().is_success() || answered_inline {
            // Either an error status or a server that answers on the POST itself.
            return read_rpc_response(&self.post_url, method, response, self.read_timeout).await;
        }

        slot.wait()
            .await
            .ok_or_else(|| Error::lost(&self.url, "event stream closed while waiting for response"))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notif = JsonRpcNotification::new(method, params);
        let response = self.post(method, &notif, &[]).await?;
        if !response.status().is_success() {
            warn!(method, status = %response.status(), "SSE notification returned non-success");
        }
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    async fn close(&self) {
        self.reader.abort();
        self.alive.store(false, Ordering::Release);
        self.pending.fail_all();
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
