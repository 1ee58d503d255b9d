//! Worker-side state and task bodies
//!
//! [`WorkerContext`] is owned by the queue's worker thread. Every registry
//! lookup, every on-disk mutation and every per-connection open count lives
//! here, so none of it needs a lock.

use crate::daemon::connections::ConnectionSet;
use crate::daemon::protocol::{CallbackId, ConnectionId, Operation, Reply, ReplyPayload};
use crate::drivers::FileSystem;
use crate::errors::Result;
use crate::origin::DatabaseIdentifier;
use crate::queue::{PendingReference, PendingReferences, PendingTask};
use crate::storage::{DatabaseRegistry, DeletionFilter, OriginDataManager, PathResolver, Release};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Opens one connection holds on one handle generation
#[derive(Debug, Clone, Copy)]
struct OpenRecord {
    serial: u64,
    count: usize,
}

/// Read-only view of a registered handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredDatabase {
    pub identifier: DatabaseIdentifier,
    pub serial: u64,
    pub open_count: usize,
}

pub struct WorkerContext {
    registry: DatabaseRegistry,
    resolver: Arc<PathResolver>,
    fs: Arc<dyn FileSystem>,
    connections: ConnectionSet,
    pending: PendingReferences<DatabaseIdentifier>,
    opened: HashMap<ConnectionId, HashMap<DatabaseIdentifier, OpenRecord>>,
    /// Handles left with no opens while a queued task still named them
    retained: BTreeSet<DatabaseIdentifier>,
}

impl WorkerContext {
    pub fn new(
        registry: DatabaseRegistry,
        resolver: Arc<PathResolver>,
        fs: Arc<dyn FileSystem>,
        connections: ConnectionSet,
        pending: PendingReferences<DatabaseIdentifier>,
    ) -> Self {
        Self {
            registry,
            resolver,
            fs,
            connections,
            pending,
            opened: HashMap::new(),
            retained: BTreeSet::new(),
        }
    }

    pub fn registry(&self) -> &DatabaseRegistry {
        &self.registry
    }

    pub fn connections(&self) -> &ConnectionSet {
        &self.connections
    }

    /// Run one validated operation on behalf of `connection`.
    pub fn execute(&mut self, connection: ConnectionId, operation: Operation) -> ReplyPayload {
        let payload = self.run(connection, operation);
        self.evict_retained();
        payload
    }

    fn run(&mut self, connection: ConnectionId, operation: Operation) -> ReplyPayload {
        match operation {
            Operation::EnumerateOrigins => ReplyPayload::Origins {
                origins: self.data_manager().enumerate_origins(),
            },
            Operation::DeleteForOrigin { origin } => self.bulk_delete(DeletionFilter::Origin(origin)),
            Operation::DeleteModifiedBetween { start, end } => {
                self.bulk_delete(DeletionFilter::ModifiedBetween { start, end })
            }
            Operation::DeleteAll => self.bulk_delete(DeletionFilter::All),
            Operation::OpenDatabase { identifier } => {
                let payload = self.open_database(connection, &identifier);
                self.evict_if_idle(&identifier);
                payload
            }
            Operation::CloseDatabase { identifier } => {
                let payload = self.close_database(connection, &identifier);
                self.evict_if_idle(&identifier);
                payload
            }
        }
    }

    /// Create `relative` (and parents) under the storage directory.
    pub fn ensure_relative_path(&self, relative: &Path) -> Result<PathBuf> {
        let path = self.resolver.ensure_exists(relative)?;
        debug!(path = %path.display(), "storage path ensured");
        Ok(path)
    }

    /// Release every open a closed connection still held. Returns how many.
    pub fn release_connection(&mut self, connection: ConnectionId) -> usize {
        let Some(records) = self.opened.remove(&connection) else {
            return 0;
        };

        let mut released = 0;
        for (identifier, record) in records {
            if self.current_serial(&identifier) != Some(record.serial) {
                // Handle was deleted (and maybe recreated) since this connection opened it
                continue;
            }
            for _ in 0..record.count {
                let pending = self.pending.count(&identifier);
                self.registry.release(&identifier, pending);
            }
            released += record.count;
            self.evict_if_idle(&identifier);
        }

        self.evict_retained();
        info!(connection = %connection, released, "released connection databases");
        released
    }

    /// Registered handles, ordered by identifier
    pub fn registered(&self) -> Vec<RegisteredDatabase> {
        self.registry
            .identifiers()
            .into_iter()
            .filter_map(|identifier| {
                let handle = self.registry.get(&identifier)?;
                Some(RegisteredDatabase {
                    serial: handle.serial(),
                    open_count: handle.open_count(),
                    identifier,
                })
            })
            .collect()
    }

    fn data_manager(&mut self) -> OriginDataManager<'_> {
        OriginDataManager::new(&mut self.registry, &self.resolver, self.fs.as_ref())
    }

    fn bulk_delete(&mut self, filter: DeletionFilter) -> ReplyPayload {
        let count = self.data_manager().delete_matching(&filter);
        self.forget_stale_opens();
        ReplyPayload::Removed { count }
    }

    /// Drop open records whose handle generation no longer exists.
    fn forget_stale_opens(&mut self) {
        let registry = &self.registry;
        for records in self.opened.values_mut() {
            records.retain(|identifier, record| {
                registry
                    .get(identifier)
                    .is_some_and(|handle| handle.serial() == record.serial)
            });
        }
        self.opened.retain(|_, records| !records.is_empty());
    }

    fn current_serial(&self, identifier: &DatabaseIdentifier) -> Option<u64> {
        self.registry.get(identifier).map(|handle| handle.serial())
    }

    fn open_database(&mut self, connection: ConnectionId, identifier: &DatabaseIdentifier) -> ReplyPayload {
        // Its release-connection task may already have run
        if !self.connections.is_attached(connection) {
            debug!(connection = %connection, database = %identifier, "open for a closed connection");
            return ReplyPayload::Failed {
                message: format!("connection {} is closed", connection),
            };
        }

        let path = self.resolver.database_path(identifier);
        let serial = match self.registry.acquire(identifier, &path) {
            Ok(handle) => handle.serial(),
            Err(e) => {
                error!(database = %identifier, error = %e, "failed to open database");
                return ReplyPayload::Failed { message: e.to_string() };
            }
        };

        let record = self
            .opened
            .entry(connection)
            .or_default()
            .entry(identifier.clone())
            .or_insert(OpenRecord { serial, count: 0 });
        if record.serial != serial {
            *record = OpenRecord { serial, count: 0 };
        }
        record.count += 1;

        debug!(connection = %connection, database = %identifier, serial, "database opened");
        ReplyPayload::Opened {
            identifier: identifier.clone(),
            serial,
        }
    }

    fn close_database(&mut self, connection: ConnectionId, identifier: &DatabaseIdentifier) -> ReplyPayload {
        let current = self.current_serial(identifier);
        let Some(records) = self.opened.get_mut(&connection) else {
            return not_open(identifier);
        };
        let Some(record) = records.get_mut(identifier) else {
            return not_open(identifier);
        };

        let stale = Some(record.serial) != current;
        record.count -= 1;
        if record.count == 0 || stale {
            records.remove(identifier);
        }
        if records.is_empty() {
            self.opened.remove(&connection);
        }

        if stale {
            debug!(connection = %connection, database = %identifier, "close of a deleted handle");
            return ReplyPayload::Closed { evicted: false };
        }

        let pending = self.pending.count(identifier);
        let outcome = self.registry.release(identifier, pending);
        debug!(connection = %connection, database = %identifier, ?outcome, "database closed");
        ReplyPayload::Closed {
            evicted: outcome == Release::Evicted,
        }
    }

    fn evict_if_idle(&mut self, identifier: &DatabaseIdentifier) {
        let pending = self.pending.count(identifier);
        if self.registry.evict_if_idle(identifier, pending) {
            self.retained.remove(identifier);
            debug!(database = %identifier, "evicted idle database handle");
        } else if self.registry.get(identifier).is_some_and(|handle| handle.open_count() == 0) {
            self.retained.insert(identifier.clone());
        } else {
            self.retained.remove(identifier);
        }
    }

    /// Retry eviction of retained handles. A reference dropped without its
    /// task ever running (enqueue refused) leaves nobody else to do it.
    fn evict_retained(&mut self) {
        let retained: Vec<_> = self.retained.iter().cloned().collect();
        for identifier in retained {
            self.evict_if_idle(&identifier);
        }
    }
}

fn not_open(identifier: &DatabaseIdentifier) -> ReplyPayload {
    warn!(database = %identifier, "close for a database this connection has not opened");
    ReplyPayload::Failed {
        message: format!("{} is not open on this connection", identifier),
    }
}

/// A validated client request waiting on the queue
pub struct RequestTask {
    pub connection: ConnectionId,
    pub callback_id: CallbackId,
    pub operation: Operation,
    /// Held while queued so the named handle is not evicted underneath it
    pub reference: Option<PendingReference<DatabaseIdentifier>>,
}

impl RequestTask {
    pub fn into_pending(self) -> PendingTask<WorkerContext> {
        let label = self.operation.kind().as_str();
        PendingTask::new(label, move |ctx: &mut WorkerContext| {
            let RequestTask {
                connection,
                callback_id,
                operation,
                reference,
            } = self;
            drop(reference);

            let payload = ctx.execute(connection, operation);
            ctx.connections.route_reply(connection, Reply { callback_id, payload });
        })
    }
}
