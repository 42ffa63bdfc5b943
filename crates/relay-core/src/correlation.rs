//! Matching asynchronous responses to the requests that caused them.
//!
//! A client posts a request on the side channel and receives the answer on
//! the session stream. [`PendingRequests`] keeps one waiter per request id; the
//! stream reader resolves waiters as responses arrive and fails all of them
//! when the stream ends, so nobody waits on a session that no longer exists.

use crate::error::RelayError;
use crate::protocol::{JsonRpcResponse, RequestId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

type Waiter = oneshot::Sender<Result<Value, RelayError>>;

#[derive(Default)]
struct PendingState {
    waiters: HashMap<RequestId, Waiter>,
    closed: Option<String>,
}

/// Table of in-flight requests for one session.
pub struct PendingRequests {
    state: Mutex<PendingState>,
    next_id: AtomicI64,
}

/// Handle to await a single response.
#[derive(Debug)]
pub struct PendingResponse {
    id: RequestId,
    rx: oneshot::Receiver<Result<Value, RelayError>>,
}

impl PendingResponse {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the response. Resolves with `SessionNotFound` if the session
    /// closes first.
    pub async fn wait(self) -> Result<Value, RelayError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(RelayError::SessionNotFound(format!(
                "session closed before request {} completed",
                self.id
            ))),
        }
    }
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PendingState::default()),
            next_id: AtomicI64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a fresh id and a waiter for it.
    pub fn register(&self) -> Result<PendingResponse, RelayError> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        if let Some(reason) = &state.closed {
            return Err(RelayError::SessionNotFound(reason.clone()));
        }
        state.waiters.insert(id.clone(), tx);
        Ok(PendingResponse { id, rx })
    }

    /// Deliver a response to its waiter. Returns `false` when nobody was waiting
    /// for that id.
    pub fn resolve(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = response.id.clone() else {
            tracing::debug!("Dropping response without id");
            return false;
        };
        let waiter = self.lock().waiters.remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(response.into_result());
                true
            }
            None => {
                tracing::debug!(request_id = %id, "Response for unknown request");
                false
            }
        }
    }

    /// Fail a single waiter, e.g. when its request could not be posted.
    pub fn fail(&self, id: &RequestId, error: RelayError) {
        if let Some(tx) = self.lock().waiters.remove(id) {
            let _ = tx.send(Err(error));
        }
    }

    /// Mark the session closed and fail every waiter with `SessionNotFound`.
    /// Later registrations fail immediately.
    pub fn close(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let drained: Vec<_> = {
            let mut state = self.lock();
            if state.closed.is_none() {
                state.closed = Some(reason.clone());
            }
            state.waiters.drain().collect()
        };
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), %reason, "Failing pending requests");
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(RelayError::SessionNotFound(reason.clone())));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    /// Number of requests still waiting for a response.
    pub fn len(&self) -> usize {
        self.lock().waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}
