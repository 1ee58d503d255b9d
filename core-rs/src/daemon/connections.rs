// ConnectionSet - Live client connections and their outstanding callbacks
//
// Responsibilities:
// - Hand out connection ids and reply channels on attach
// - Track outstanding callback ids per connection (duplicates are rejected)
// - Route a finished task's reply back to the issuing connection
// - Drop replies for connections that have gone away
//
// Producers and the worker both touch the set, so the table sits behind a
// mutex. No lock is held across a task.

use crate::daemon::protocol::{CallbackId, ConnectionId, Reply};
use crate::errors::{Result, StoreError};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

struct ConnectionRecord {
    replies: UnboundedSender<Reply>,
    outstanding: BTreeSet<CallbackId>,
    attached_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct ConnectionSet {
    table: Arc<Mutex<HashMap<ConnectionId, ConnectionRecord>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionRecord>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new connection and return its client end.
    pub fn attach(&self) -> ClientConnection {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        self.table().insert(
            id,
            ConnectionRecord {
                replies: tx,
                outstanding: BTreeSet::new(),
                attached_at: Utc::now(),
            },
        );
        info!(connection = %id, "connection attached");
        ClientConnection { id, replies: rx }
    }

    /// Forget a connection. Returns the callbacks that will never be answered,
    /// or `None` if the connection was unknown.
    pub fn detach(&self, id: ConnectionId) -> Option<Vec<CallbackId>> {
        let record = self.table().remove(&id)?;
        let dropped: Vec<CallbackId> = record.outstanding.into_iter().collect();
        let lifetime_ms = (Utc::now() - record.attached_at).num_milliseconds();
        info!(connection = %id, dropped_callbacks = dropped.len(), lifetime_ms, "connection detached");
        Some(dropped)
    }

    /// Mark `callback` as outstanding on `id`.
    pub fn track(&self, id: ConnectionId, callback: CallbackId) -> Result<()> {
        let mut table = self.table();
        let record = table.get_mut(&id).ok_or(StoreError::UnknownConnection(id.0))?;
        if !record.outstanding.insert(callback) {
            return Err(StoreError::DuplicateCallback {
                connection: id.0,
                callback: callback.0,
            });
        }
        Ok(())
    }

    /// Undo `track` for a request that never made it onto the queue.
    pub fn untrack(&self, id: ConnectionId, callback: CallbackId) {
        if let Some(record) = self.table().get_mut(&id) {
            record.outstanding.remove(&callback);
        }
    }

    /// Deliver a reply. Returns `false` when it was dropped because the
    /// connection is gone.
    pub fn route_reply(&self, id: ConnectionId, reply: Reply) -> bool {
        let mut table = self.table();
        let Some(record) = table.get_mut(&id) else {
            debug!(connection = %id, callback = %reply.callback_id, "connection gone; reply dropped");
            return false;
        };

        let callback = reply.callback_id;
        if !record.outstanding.remove(&callback) {
            warn!(connection = %id, %callback, "reply for a callback that was not outstanding");
        }
        if record.replies.send(reply).is_err() {
            debug!(connection = %id, %callback, "client end closed; reply dropped");
            return false;
        }
        true
    }

    pub fn is_attached(&self, id: ConnectionId) -> bool {
        self.table().contains_key(&id)
    }

    /// Outstanding callbacks on a connection, ordered
    pub fn outstanding(&self, id: ConnectionId) -> Vec<CallbackId> {
        self.table()
            .get(&id)
            .map(|record| record.outstanding.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}

/// Client side of an attached connection
pub struct ClientConnection {
    id: ConnectionId,
    replies: UnboundedReceiver<Reply>,
}

impl ClientConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Next reply; `None` once the connection is detached and drained.
    pub async fn next_reply(&mut self) -> Option<Reply> {
        self.replies.recv().await
    }

    pub fn try_next_reply(&mut self) -> Option<Reply> {
        match self.replies.try_recv() {
            Ok(reply) => Some(reply),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Blocking variant for callers outside an async runtime
    pub fn blocking_next_reply(&mut self) -> Option<Reply> {
        self.replies.blocking_recv()
    }
}
