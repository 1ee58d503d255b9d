//! Database registry - sole owner of open per-origin database handles
//!
//! Invariant: at most one handle per [`DatabaseIdentifier`]. The registry is
//! only ever touched from the worker, so it carries no lock of its own; the
//! single-writer discipline is what keeps `get_or_create` race free.

use crate::drivers::{DatabaseEngine, EngineDatabase};
use crate::errors::Result;
use crate::origin::DatabaseIdentifier;
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// One open per-origin database
#[derive(Debug)]
pub struct DatabaseHandle {
    identifier: DatabaseIdentifier,
    database: EngineDatabase,
    /// Monotonic per registry; a recreated handle always gets a new serial
    serial: u64,
    /// Number of client opens not yet matched by a close
    open_count: usize,
    created_at: DateTime<Utc>,
}

impl DatabaseHandle {
    pub fn identifier(&self) -> &DatabaseIdentifier {
        &self.identifier
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn open_count(&self) -> usize {
        self.open_count
    }

    pub fn path(&self) -> &Path {
        &self.database.path
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Outcome of [`DatabaseRegistry::release`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// No handle for the identifier, or it had no opens left
    NotOpen,
    /// Other opens remain
    StillOpen(usize),
    /// Last open released but tasks still reference the identifier
    Retained,
    /// Last open released and the handle was evicted
    Evicted,
}

pub struct DatabaseRegistry {
    engine: Arc<dyn DatabaseEngine>,
    handles: HashMap<DatabaseIdentifier, DatabaseHandle>,
    next_serial: u64,
}

impl DatabaseRegistry {
    pub fn new(engine: Arc<dyn DatabaseEngine>) -> Self {
        Self {
            engine,
            handles: HashMap::new(),
            next_serial: 1,
        }
    }

    /// Existing handle for `identifier`, or a freshly opened one at `path`.
    pub fn get_or_create(&mut self, identifier: &DatabaseIdentifier, path: &Path) -> Result<&mut DatabaseHandle> {
        match self.handles.entry(identifier.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let database = self.engine.open(identifier, path)?;
                let serial = self.next_serial;
                self.next_serial += 1;
                debug!(database = %identifier, serial, "registered database handle");
                Ok(entry.insert(DatabaseHandle {
                    identifier: identifier.clone(),
                    database,
                    serial,
                    open_count: 0,
                    created_at: Utc::now(),
                }))
            }
        }
    }

    /// `get_or_create` plus one client open
    pub fn acquire(&mut self, identifier: &DatabaseIdentifier, path: &Path) -> Result<&DatabaseHandle> {
        let handle = self.get_or_create(identifier, path)?;
        handle.open_count += 1;
        Ok(handle)
    }

    /// Drop one client open. The handle is evicted once no open remains and
    /// `pending_references` (queued tasks naming this identifier) is zero.
    pub fn release(&mut self, identifier: &DatabaseIdentifier, pending_references: usize) -> Release {
        let Some(handle) = self.handles.get_mut(identifier) else {
            return Release::NotOpen;
        };
        if handle.open_count == 0 {
            return Release::NotOpen;
        }

        handle.open_count -= 1;
        if handle.open_count > 0 {
            return Release::StillOpen(handle.open_count);
        }
        if pending_references > 0 {
            return Release::Retained;
        }

        self.remove(identifier);
        Release::Evicted
    }

    /// Evict a handle left with no opens once nothing references it anymore.
    pub fn evict_if_idle(&mut self, identifier: &DatabaseIdentifier, pending_references: usize) -> bool {
        let idle = self
            .handles
            .get(identifier)
            .is_some_and(|handle| handle.open_count == 0 && pending_references == 0);
        idle && self.remove(identifier)
    }

    pub fn get(&self, identifier: &DatabaseIdentifier) -> Option<&DatabaseHandle> {
        self.handles.get(identifier)
    }

    pub fn contains(&self, identifier: &DatabaseIdentifier) -> bool {
        self.handles.contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Registered identifiers, sorted
    pub fn identifiers(&self) -> Vec<DatabaseIdentifier> {
        let mut ids: Vec<_> = self.handles.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Unregister and close a handle, keeping its data. Idempotent.
    pub fn remove(&mut self, identifier: &DatabaseIdentifier) -> bool {
        let Some(handle) = self.handles.remove(identifier) else {
            return false;
        };
        if let Err(e) = self.engine.close(handle.database) {
            warn!(database = %identifier, error = %e, "failed to close database");
        }
        debug!(database = %identifier, serial = handle.serial, "removed database handle");
        true
    }

    /// Unregister a handle and delete its persisted data.
    ///
    /// The handle is gone from the registry even when deletion fails.
    /// Returns `Ok(false)` when nothing was registered.
    pub fn purge(&mut self, identifier: &DatabaseIdentifier) -> Result<bool> {
        let Some(handle) = self.handles.remove(identifier) else {
            return Ok(false);
        };
        debug!(database = %identifier, serial = handle.serial, "purging database handle");
        self.engine.delete_underlying(handle.database)?;
        Ok(true)
    }
}
