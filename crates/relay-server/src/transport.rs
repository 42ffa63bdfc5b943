//! Session transport: one outbound event stream per connected agent, plus a
//! side channel for posting requests into that session.
//!
//! The transport owns the session table. Entries are inserted when a stream
//! opens and removed when it closes; both go through [`SessionTransport::mutate`]
//! so table changes never interleave with each other or with lookups.

use chrono::{DateTime, Utc};
use futures::Stream;
use relay_core::error::RelayError;
use relay_core::protocol::JsonRpcMessage;
use relay_core::types::SessionId;
use serde::Serialize;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// A value pushed from the server down a session stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerPush {
    /// Where the client should post its requests. Always the first push.
    Endpoint(String),
    Message(JsonRpcMessage),
}

struct SessionEntry {
    outbound: mpsc::UnboundedSender<ServerPush>,
    inbound: mpsc::UnboundedSender<JsonRpcMessage>,
    opened_at: DateTime<Utc>,
}

/// Public view of a live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub opened_at: DateTime<Utc>,
}

struct TransportInner {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
    post_path: String,
}

/// Shared handle to the session table.
#[derive(Clone)]
pub struct SessionTransport {
    inner: Arc<TransportInner>,
}

/// Everything the opener of a session needs.
pub struct OpenedSession {
    pub id: SessionId,
    /// Server → client pushes. Dropping it closes the session.
    pub stream: SessionStream,
    /// Messages posted by the client, for the session's inbound handler.
    pub inbound: mpsc::UnboundedReceiver<JsonRpcMessage>,
}

impl SessionTransport {
    /// `post_path` is the side-channel path announced to clients, e.g. `/messages`.
    pub fn new(post_path: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                sessions: RwLock::new(HashMap::new()),
                post_path: post_path.into(),
            }),
        }
    }

    /// The only place the session table is written.
    fn mutate<R>(&self, f: impl FnOnce(&mut HashMap<SessionId, SessionEntry>) -> R) -> R {
        let mut sessions = self
            .inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut sessions)
    }

    fn lookup<R>(&self, id: &SessionId, f: impl FnOnce(&SessionEntry) -> R) -> Option<R> {
        let sessions = self
            .inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        sessions.get(id).map(f)
    }

    /// Post path for a session, e.g. `/messages?sessionId=<id>`.
    pub fn endpoint_for(&self, id: &SessionId) -> String {
        format!("{}?sessionId={}", self.inner.post_path, id)
    }

    /// Allocate a new session and register its stream. The endpoint
    /// announcement is already queued on the returned stream.
    pub fn open_session(&self) -> OpenedSession {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let id = self.mutate(|sessions| {
            let mut id = SessionId::generate();
            while sessions.contains_key(&id) {
                id = SessionId::generate();
            }
            sessions.insert(
                id.clone(),
                SessionEntry {
                    outbound: outbound_tx.clone(),
                    inbound: inbound_tx,
                    opened_at: Utc::now(),
                },
            );
            id
        });

        // The receiver is alive, so this cannot fail.
        let _ = outbound_tx.send(ServerPush::Endpoint(self.endpoint_for(&id)));
        info!(session_id = %id, "Session opened");

        OpenedSession {
            id: id.clone(),
            stream: SessionStream {
                rx: outbound_rx,
                _guard: SessionGuard {
                    transport: self.clone(),
                    id,
                },
            },
            inbound: inbound_rx,
        }
    }

    /// Tear a session down. Its stream ends and its inbound handler stops.
    /// Returns `false` if the session was already gone.
    pub fn close_session(&self, id: &SessionId) -> bool {
        let removed = self.mutate(|sessions| sessions.remove(id));
        match removed {
            Some(_) => {
                info!(session_id = %id, "Session closed");
                true
            }
            None => false,
        }
    }

    /// Hand a client message to the session's inbound handler. Returns once the
    /// message is queued, not once it is processed.
    pub fn post_to_session(
        &self,
        id: &SessionId,
        message: JsonRpcMessage,
    ) -> Result<(), RelayError> {
        let inbound = self
            .lookup(id, |entry| entry.inbound.clone())
            .ok_or_else(|| RelayError::SessionNotFound(id.to_string()))?;
        inbound
            .send(message)
            .map_err(|_| RelayError::SessionNotFound(id.to_string()))?;
        debug!(session_id = %id, "Message delivered to session");
        Ok(())
    }

    /// Push a message down a session's stream.
    pub fn push(&self, id: &SessionId, message: JsonRpcMessage) -> Result<(), RelayError> {
        let outbound = self
            .lookup(id, |entry| entry.outbound.clone())
            .ok_or_else(|| RelayError::SessionNotFound(id.to_string()))?;
        outbound
            .send(ServerPush::Message(message))
            .map_err(|_| RelayError::SessionNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.lookup(id, |_| ()).is_some()
    }

    /// Live sessions, oldest first.
    pub fn sessions(&self) -> Vec<SessionSummary> {
        let sessions = self
            .inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<_> = sessions
            .iter()
            .map(|(id, entry)| SessionSummary {
                id: id.clone(),
                opened_at: entry.opened_at,
            })
            .collect();
        list.sort_by_key(|s| s.opened_at);
        list
    }

    pub fn len(&self) -> usize {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionTransport {
    fn default() -> Self {
        Self::new("/messages")
    }
}

/// Removes the session from the table when the stream is dropped, which is how
/// a client disconnect reaches the transport.
struct SessionGuard {
    transport: SessionTransport,
    id: SessionId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.transport.close_session(&self.id);
    }
}

/// Stream of pushes for one session. Ends when the session is closed.
pub struct SessionStream {
    rx: mpsc::UnboundedReceiver<ServerPush>,
    _guard: SessionGuard,
}

impl SessionStream {
    pub fn session_id(&self) -> &SessionId {
        &self._guard.id
    }
}

impl Stream for SessionStream {
    type Item = ServerPush;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
