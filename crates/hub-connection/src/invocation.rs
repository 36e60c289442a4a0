//! Pending invocation tracking.
//!
//! Ids come from a counter that lives as long as the connection, so an id is
//! never reused across reconnects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;

use relayhub_protocol::Completion;

use crate::error::HubError;

pub(crate) type Reply = Result<Value, HubError>;

/// Outstanding invocations keyed by invocation id.
#[derive(Default)]
pub(crate) struct InvocationTracker {
    next_id: AtomicU64,
    pending: Mutex<HashMap<String, oneshot::Sender<Reply>>>,
}

impl InvocationTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Reply>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates a fresh id and registers a waiter for it.
    pub(crate) fn register(&self) -> (String, oneshot::Receiver<Reply>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id.clone(), tx);
        (id, rx)
    }

    /// Forgets a waiter (timeout or send failure). Returns `false` if the
    /// entry was already resolved.
    pub(crate) fn remove(&self, id: &str) -> bool {
        self.pending().remove(id).is_some()
    }

    /// Resolves the waiter matching `completion`. Returns `false` for an
    /// unknown id.
    pub(crate) fn complete(&self, completion: Completion) -> bool {
        let Some(tx) = self.pending().remove(&completion.invocation_id) else {
            return false;
        };

        let reply = match completion.error {
            Some(message) => Err(HubError::RemoteInvocation(message)),
            None => Ok(completion.result.unwrap_or(Value::Null)),
        };
        // The caller may have given up already.
        let _ = tx.send(reply);
        true
    }

    /// Rejects every outstanding invocation and clears the map.
    pub(crate) fn reject_all(&self, reason: &str) -> usize {
        let drained: Vec<_> = self.pending().drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(HubError::ConnectionClosed(reason.to_string())));
        }
        count
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pending().len()
    }
}
