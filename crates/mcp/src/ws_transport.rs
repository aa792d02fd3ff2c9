//! WebSocket transport: one persistent socket, responses matched by id.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    serde_json::Value,
    tokio::{sync::mpsc, task::JoinHandle},
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    pending::PendingRequests,
    registry::TransportKind,
    traits::{Headers, McpTransport},
    types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse},
};

pub struct WebSocketTransport {
    url: String,
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingRequests,
    alive: Arc<AtomicBool>,
    tasks: [JoinHandle<()>; 2],
}

impl WebSocketTransport {
    pub async fn connect(url: &str) -> Result<Self> {
        let (socket, _) = connect_async(url).await.map_err(|e| Error::ConnectionRefused {
            target: url.to_string(),
            reason: e.to_string(),
        })?;
        info!(url, "WebSocket connected");
        let (mut sink, mut stream) = socket.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let pending = PendingRequests::new();
        let alive = Arc::new(AtomicBool::new(true));

        // Whole frames only: a dropped caller can never leave half a message.
        let writer = {
            let alive = Arc::clone(&alive);
            let url = url.to_string();
            tokio::spawn(async move {
                while let Some(message) = outbound_rx.recv().await {
                    let closing = matches!(message, Message::Close(_));
                    if let Err(e) = sink.send(message).await {
                        warn!(url = %url, error = %e, "WebSocket send failed");
                        break;
                    }
                    if closing {
                        break;
                    }
                }
                alive.store(false, Ordering::Release);
            })
        };

        let reader = {
            let alive = Arc::clone(&alive);
            let pending = pending.clone();
            let url = url.to_string();
            tokio::spawn(async move {
                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(Message::Text(text)) => {
                            match serde_json::from_str::<JsonRpcResponse>(text.as_str()) {
                                Ok(resp) if resp.result.is_some() || resp.error.is_some() => {
                                    pending.complete(resp);
                                },
                                Ok(_) => debug!(url = %url, "ignoring server notification"),
                                Err(e) => debug!(url = %url, error = %e, "non JSON-RPC frame"),
                            }
                        },
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {},
                        Err(e) => {
                            warn!(url = %url, error = %e, "WebSocket read failed");
                            break;
                        },
                    }
                }
                debug!(url = %url, "WebSocket closed");
                alive.store(false, Ordering::Release);
                pending.fail_all();
            })
        };

        Ok(Self {
            url: url.to_string(),
            outbound,
            pending,
            alive,
            tasks: [writer, reader],
        })
    }

    fn send(&self, payload: String) -> Result<()> {
        self.outbound
            .send(Message::text(payload))
            .map_err(|_| Error::lost(&self.url, "socket writer stopped"))
    }
}

#[async_trait]
impl McpTransport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
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
            return Err(Error::lost(&self.url, "socket closed"));
        }
        debug!(method, id, url = %self.url, "client -> MCP server (ws)");
        self.send(serde_json::to_string(&req)?)?;

        slot.wait()
            .await
            .ok_or_else(|| Error::lost(&self.url, "socket closed while waiting for response"))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.send(serde_json::to_string(&JsonRpcNotification::new(method, params))?)
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    async fn close(&self) {
        let _ = self.outbound.send(Message::Close(None));
        self.alive.store(false, Ordering::Release);
        self.pending.fail_all();
        self.tasks[1].abort();
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
