//! Bulk origin data management
//!
//! Enumerate and delete per-origin databases across the registry and the
//! disk. These are the long-running operations the task queue exists for;
//! they must only run on the worker.
//!
//! Failures are contained: a database that cannot be deleted is logged and
//! left out of the returned count, and the remaining matches are still
//! processed.

use crate::drivers::FileSystem;
use crate::origin::{DatabaseIdentifier, SecurityOrigin};
use crate::storage::paths::PathResolver;
use crate::storage::registry::DatabaseRegistry;
use crate::storage::scanner::{DiskEntry, OriginScanner};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{error, info, warn};

/// Which databases a bulk delete applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionFilter {
    All,
    Origin(SecurityOrigin),
    /// Inclusive range on the newest modification time of a database
    ModifiedBetween { start: DateTime<Utc>, end: DateTime<Utc> },
}

impl DeletionFilter {
    fn matches_disk(&self, entry: &DiskEntry) -> bool {
        match self {
            DeletionFilter::All => true,
            DeletionFilter::Origin(origin) => &entry.identifier.origin == origin,
            DeletionFilter::ModifiedBetween { start, end } => entry
                .modified
                .is_some_and(|modified| *start <= modified && modified <= *end),
        }
    }

    /// Registry-only handles have no modification time; date filters skip them.
    fn matches_handle(&self, identifier: &DatabaseIdentifier) -> bool {
        match self {
            DeletionFilter::All => true,
            DeletionFilter::Origin(origin) => &identifier.origin == origin,
            DeletionFilter::ModifiedBetween { .. } => false,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            DeletionFilter::All => "all",
            DeletionFilter::Origin(_) => "origin",
            DeletionFilter::ModifiedBetween { .. } => "modified-between",
        }
    }
}

/// Bulk operations over registry + disk
pub struct OriginDataManager<'a> {
    registry: &'a mut DatabaseRegistry,
    resolver: &'a PathResolver,
    fs: &'a dyn FileSystem,
}

impl<'a> OriginDataManager<'a> {
    pub fn new(registry: &'a mut DatabaseRegistry, resolver: &'a PathResolver, fs: &'a dyn FileSystem) -> Self {
        Self { registry, resolver, fs }
    }

    /// Origins present on disk, ordered. A scan failure yields an empty list.
    pub fn enumerate_origins(&self) -> Vec<SecurityOrigin> {
        match OriginScanner::new(self.resolver, self.fs).origins() {
            Ok(origins) => origins,
            Err(e) => {
                error!(root = %self.resolver.root().display(), error = %e, "failed to enumerate origins");
                Vec::new()
            }
        }
    }

    pub fn delete_all(&mut self) -> usize {
        self.delete_matching(&DeletionFilter::All)
    }

    pub fn delete_for_origin(&mut self, origin: &SecurityOrigin) -> usize {
        self.delete_matching(&DeletionFilter::Origin(origin.clone()))
    }

    pub fn delete_modified_between(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> usize {
        self.delete_matching(&DeletionFilter::ModifiedBetween { start, end })
    }

    /// Delete every database matching `filter`; returns how many were removed.
    ///
    /// A database counts once whether it was registered, on disk, or both.
    pub fn delete_matching(&mut self, filter: &DeletionFilter) -> usize {
        let scanner = OriginScanner::new(self.resolver, self.fs);
        let on_disk: BTreeMap<DatabaseIdentifier, DiskEntry> = match scanner.databases(None) {
            Ok(entries) => entries
                .into_iter()
                .filter(|entry| filter.matches_disk(entry))
                .map(|entry| (entry.identifier.clone(), entry))
                .collect(),
            Err(e) => {
                error!(filter = filter.label(), error = %e, "failed to scan storage; deleting registered handles only");
                BTreeMap::new()
            }
        };

        let mut matched: BTreeSet<DatabaseIdentifier> = on_disk.keys().cloned().collect();
        matched.extend(
            self.registry
                .identifiers()
                .into_iter()
                .filter(|identifier| filter.matches_handle(identifier)),
        );

        let mut removed = 0;
        for identifier in &matched {
            // Purged regardless of pending references; queued opens get a fresh handle
            let result = if self.registry.contains(identifier) {
                self.registry.purge(identifier).map(|_| ())
            } else {
                match on_disk.get(identifier) {
                    Some(entry) => self.fs.delete_entry(&entry.path),
                    None => Ok(()),
                }
            };

            match result {
                Ok(()) => removed += 1,
                Err(e) => error!(database = %identifier, error = %e, "failed to delete database"),
            }
        }

        self.cleanup_origin_directories(filter);
        info!(filter = filter.label(), removed, "bulk delete finished");
        removed
    }

    /// Remove whole origin directories the filter covers, then prune any
    /// origin directory left empty.
    fn cleanup_origin_directories(&self, filter: &DeletionFilter) {
        let scanner = OriginScanner::new(self.resolver, self.fs);
        let directories = match scanner.origin_directories() {
            Ok(directories) => directories,
            Err(e) => {
                warn!(error = %e, "cannot list origin directories for cleanup");
                return;
            }
        };

        for dir in directories {
            let remove_whole = match filter {
                DeletionFilter::All => true,
                DeletionFilter::Origin(origin) => origin == &dir.origin,
                DeletionFilter::ModifiedBetween { .. } => false,
            };

            let remove = remove_whole
                || match self.fs.list_entries(&dir.path) {
                    Ok(entries) => entries.is_empty(),
                    Err(e) => {
                        warn!(path = %dir.path.display(), error = %e, "cannot list origin directory");
                        false
                    }
                };

            if remove {
                if let Err(e) = self.fs.delete_entry(&dir.path) {
                    warn!(path = %dir.path.display(), error = %e, "failed to remove origin directory");
                }
            }
        }
    }
}
