//! Request/response correlation for multiplexed transports.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use {tokio::sync::oneshot, tracing::warn};

use crate::types::JsonRpcResponse;

type Waiters = HashMap<String, oneshot::Sender<JsonRpcResponse>>;

/// Pending requests keyed by JSON-RPC id.
///
/// The lock is a plain mutex: it is never held across an await.
#[derive(Debug, Default, Clone)]
pub(crate) struct PendingRequests {
    waiters: Arc<Mutex<Waiters>>,
    next_id: Arc<AtomicU64>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self {
            waiters: Arc::default(),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a waiter. Dropping the returned slot unregisters it, so a
    /// cancelled call leaves nothing behind.
    pub(crate) fn register(&self, key: String) -> PendingSlot {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(key.clone(), tx);
        PendingSlot {
            key,
            rx: Some(rx),
            pending: self.clone(),
        }
    }

    /// Route a response to its waiter. Returns false for unknown ids.
    pub(crate) fn complete(&self, response: JsonRpcResponse) -> bool {
        let key = response.id_key();
        let Some(tx) = self.lock().remove(&key) else {
            warn!(id = %key, "received response for unknown request id");
            return false;
        };
        tx.send(response).is_ok()
    }

    /// Fail every waiter, e.g. when the reader loop ends.
    pub(crate) fn fail_all(&self) {
        self.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) struct PendingSlot {
    key: String,
    rx: Option<oneshot::Receiver<JsonRpcResponse>>,
    pending: PendingRequests,
}

impl PendingSlot {
    /// Wait for the response. `None` means the connection went away.
    pub(crate) async fn wait(mut self) -> Option<JsonRpcResponse> {
        let rx = self.rx.take()?;
        rx.await.ok()
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.key);
    }
}
