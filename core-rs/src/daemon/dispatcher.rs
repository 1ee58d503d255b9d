// RequestDispatcher - Turns inbound requests into queued tasks
//
// Runs on the caller's thread and never blocks on storage work:
// validate -> track callback -> enqueue. Anything that fails before the task
// is on the queue is reported synchronously and leaves no trace behind.

use crate::daemon::connections::ConnectionSet;
use crate::daemon::protocol::{ConnectionId, Operation, RawRequest};
use crate::daemon::worker::{RequestTask, WorkerContext};
use crate::errors::Result;
use crate::origin::DatabaseIdentifier;
use crate::queue::{PendingReferences, TaskQueue};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct RequestDispatcher {
    queue: Arc<TaskQueue<WorkerContext>>,
    connections: ConnectionSet,
    pending: PendingReferences<DatabaseIdentifier>,
}

impl RequestDispatcher {
    pub fn new(
        queue: Arc<TaskQueue<WorkerContext>>,
        connections: ConnectionSet,
        pending: PendingReferences<DatabaseIdentifier>,
    ) -> Self {
        Self {
            queue,
            connections,
            pending,
        }
    }

    /// Queue `request` for `connection`. The reply arrives later on the
    /// connection's reply channel.
    ///
    /// Errors:
    /// - protocol violation: unknown kind, malformed parameters, duplicate callback
    /// - `UnknownConnection`: connection not attached
    /// - `QueueFull` / `QueueClosed`: nothing was queued
    pub fn dispatch(&self, connection: ConnectionId, request: RawRequest) -> Result<()> {
        let RawRequest {
            kind,
            parameters,
            callback_id,
        } = request;

        let operation = match Operation::parse(&kind, &parameters) {
            Ok(operation) => operation,
            Err(e) => {
                warn!(connection = %connection, %kind, callback = %callback_id, error = %e, "rejected request");
                return Err(e);
            }
        };

        if let Err(e) = self.connections.track(connection, callback_id) {
            if e.is_protocol_violation() {
                warn!(connection = %connection, %kind, callback = %callback_id, error = %e, "rejected request");
            }
            return Err(e);
        }

        let reference = operation.identifier().map(|identifier| self.pending.reference(identifier.clone()));
        let task = RequestTask {
            connection,
            callback_id,
            operation,
            reference,
        };

        if let Err(e) = self.queue.enqueue(task.into_pending()) {
            self.connections.untrack(connection, callback_id);
            warn!(connection = %connection, %kind, callback = %callback_id, error = %e, "could not queue request");
            return Err(e);
        }

        debug!(connection = %connection, %kind, callback = %callback_id, "request queued");
        Ok(())
    }
}
