//! Pending-request table: tracks in-flight calls keyed by the numeric id the
//! client assigned them, and delivers the matching reply (or a disconnect
//! error) to whoever is waiting.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use super::client::ClientError;

type Waiter = oneshot::Sender<Result<serde_json::Value, ClientError>>;

#[derive(Default)]
pub struct PendingTable {
    inner: Mutex<HashMap<u64, Waiter>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new in-flight call, returning the receiver half.
    pub fn register(&self, id: u64) -> oneshot::Receiver<Result<serde_json::Value, ClientError>> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().expect("pending table poisoned").insert(id, tx);
        rx
    }

    /// Remove a registration without completing it (used after a timeout, so
    /// a late reply silently finds no waiter instead of panicking on send).
    pub fn forget(&self, id: u64) {
        self.inner.lock().expect("pending table poisoned").remove(&id);
    }

    /// Complete the call with the given result. No-op if the id is unknown
    /// (already timed out, or a duplicate/unexpected reply).
    pub fn complete(&self, id: u64, result: Result<serde_json::Value, ClientError>) {
        if let Some(tx) = self.inner.lock().expect("pending table poisoned").remove(&id) {
            let _ = tx.send(result);
        }
    }

    /// Drain every outstanding call with `Disconnected`, called once when the
    /// reader task observes the channel close.
    pub fn drain_disconnected(&self) {
        let waiters: Vec<Waiter> = self
            .inner
            .lock()
            .expect("pending table poisoned")
            .drain()
            .map(|(_, tx)| tx)
            .collect();
        for tx in waiters {
            let _ = tx.send(Err(ClientError::Disconnected));
        }
    }
}
