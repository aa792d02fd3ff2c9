//! The transport seam. Each wire dialect implements [`McpTransport`]; the
//! connector only ever talks to `Arc<dyn McpTransport>`.

use {async_trait::async_trait, serde_json::Value};

use crate::{error::Result, registry::TransportKind, types::JsonRpcResponse};

/// Extra HTTP headers for one request (e.g. `Authorization`).
pub type Headers = [(String, String)];

#[async_trait]
pub trait McpTransport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Send a JSON-RPC request and wait for the correlated response.
    ///
    /// Implementations must stay usable if this future is dropped before it
    /// completes: the abandoned request may not corrupt the connection.
    async fn request(&self, method: &str, params: Option<Value>, headers: &Headers)
    -> Result<JsonRpcResponse>;

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// Whether the underlying connection/process is still usable.
    async fn is_alive(&self) -> bool;

    /// Close the connection or kill the process.
    async fn close(&self);
}
