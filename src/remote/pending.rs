//! Request/response correlation
//!
//! Every outstanding call owns one entry keyed by its correlation id. An entry
//! is settled by removing it from the table under the lock and consuming its
//! oneshot sender, so a response, a timeout and a connection loss can race
//! without settling the same call twice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{LinkError, Result};

/// Raw answer from the daemon
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub result: serde_json::Value,
}

struct PendingCall {
    event: String,
    sink: oneshot::Sender<Result<Reply>>,
}

/// A registered call the caller has not awaited yet
#[must_use = "a registered call must be awaited with PendingCalls::wait"]
pub struct PendingHandle {
    pub id: u64,
    event: String,
    timeout: Duration,
    rx: oneshot::Receiver<Result<Reply>>,
}

/// Correlation table of one session
pub struct PendingCalls {
    node: String,
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, PendingCall>>,
}

impl PendingCalls {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a correlation id and insert an unsettled entry
    pub fn register(&self, event: &str, timeout: Duration) -> PendingHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sink, rx) = oneshot::channel();
        self.entries.lock().insert(
            id,
            PendingCall {
                event: event.to_string(),
                sink,
            },
        );
        tracing::debug!("[{}] registered call {} '{}'", self.node, id, event);
        PendingHandle {
            id,
            event: event.to_string(),
            timeout,
            rx,
        }
    }

    /// Deliver a response. Returns false if no unsettled entry matched the id.
    pub fn settle(&self, id: u64, reply: Reply) -> bool {
        let entry = self.entries.lock().remove(&id);
        match entry {
            Some(call) => {
                tracing::debug!("[{}] call {} '{}' answered", self.node, id, call.event);
                // Receiver may be gone if the caller stopped waiting
                let _ = call.sink.send(Ok(reply));
                true
            }
            None => {
                tracing::debug!("[{}] dropping response for unknown call {}", self.node, id);
                false
            }
        }
    }

    /// Remove an entry without settling it
    pub fn cancel(&self, id: u64) -> bool {
        self.entries.lock().remove(&id).is_some()
    }

    /// Fail every outstanding call with `ConnectionLost` and empty the table.
    /// Returns the number of calls failed.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<(u64, PendingCall)> = self.entries.lock().drain().collect();
        let count = drained.len();
        for (id, call) in drained {
            tracing::debug!("[{}] call {} '{}' lost with connection", self.node, id, call.event);
            let _ = call.sink.send(Err(LinkError::ConnectionLost {
                node: self.node.clone(),
            }));
        }
        count
    }

    /// Wait for the call to settle, failing with `CallTimeout` at its deadline
    pub async fn wait(&self, handle: PendingHandle) -> Result<Reply> {
        let PendingHandle {
            id,
            event,
            timeout,
            mut rx,
        } = handle;
        // Dropping the waiting future must not leak the entry
        let _guard = RemoveOnDrop { table: self, id };

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(settled)) => settled,
            Ok(Err(_)) => Err(LinkError::ConnectionLost {
                node: self.node.clone(),
            }),
            Err(_) => {
                if self.entries.lock().remove(&id).is_some() {
                    tracing::debug!("[{}] call {} '{}' timed out", self.node, id, event);
                    Err(LinkError::CallTimeout {
                        node: self.node.clone(),
                        event,
                        timeout,
                    })
                } else {
                    // Settled between the deadline and the removal attempt; that settlement wins
                    rx.await.unwrap_or_else(|_| {
                        Err(LinkError::ConnectionLost {
                            node: self.node.clone(),
                        })
                    })
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

struct RemoveOnDrop<'a> {
    table: &'a PendingCalls,
    id: u64,
}

impl Drop for RemoveOnDrop<'_> {
    fn drop(&mut self) {
        self.table.entries.lock().remove(&self.id);
    }
}
