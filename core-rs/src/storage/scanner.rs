// storage/scanner.rs - On-disk origin and database scanner
//
// Walks the storage directory two levels deep:
//   {root}/{scheme_host_port}/idb-{hex name}/
// and reports which origins and databases are present. Directories that do
// not parse as origins or database directories are skipped, never deleted.

use crate::drivers::FileSystem;
use crate::errors::Result;
use crate::origin::{DatabaseIdentifier, SecurityOrigin};
use crate::storage::paths::PathResolver;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Database found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskEntry {
    pub identifier: DatabaseIdentifier,
    /// Absolute database directory
    pub path: PathBuf,
    /// Newest modification time below `path`, if it could be read
    pub modified: Option<DateTime<Utc>>,
}

/// Origin directory found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginDirectory {
    pub origin: SecurityOrigin,
    pub path: PathBuf,
}

/// Scanner for the storage directory
pub struct OriginScanner<'a> {
    resolver: &'a PathResolver,
    fs: &'a dyn FileSystem,
}

impl<'a> OriginScanner<'a> {
    pub fn new(resolver: &'a PathResolver, fs: &'a dyn FileSystem) -> Self {
        Self { resolver, fs }
    }

    /// Origin directories below the root, sorted by origin
    pub fn origin_directories(&self) -> Result<Vec<OriginDirectory>> {
        let mut found = Vec::new();
        for entry in self.fs.list_entries(self.resolver.root())? {
            if !entry.is_dir() {
                continue;
            }
            match SecurityOrigin::from_directory_name(&entry.name) {
                Ok(origin) => found.push(OriginDirectory { origin, path: entry.path }),
                Err(_) => debug!(name = %entry.name, "skipping non-origin directory"),
            }
        }
        found.sort_by(|a, b| a.origin.cmp(&b.origin));
        Ok(found)
    }

    /// Distinct origins present on disk, ordered
    pub fn origins(&self) -> Result<Vec<SecurityOrigin>> {
        let origins: BTreeSet<SecurityOrigin> = self
            .origin_directories()?
            .into_iter()
            .map(|dir| dir.origin)
            .collect();
        Ok(origins.into_iter().collect())
    }

    /// Databases on disk, optionally restricted to one origin
    pub fn databases(&self, only: Option<&SecurityOrigin>) -> Result<Vec<DiskEntry>> {
        let mut entries = Vec::new();

        for origin_dir in self.origin_directories()? {
            if only.is_some_and(|origin| origin != &origin_dir.origin) {
                continue;
            }
            let origin_name = origin_dir.origin.directory_name();

            for entry in self.fs.list_entries(&origin_dir.path)? {
                if !entry.is_dir() {
                    continue;
                }
                let identifier = match DatabaseIdentifier::from_directory_names(&origin_name, &entry.name) {
                    Ok(identifier) => identifier,
                    Err(_) => {
                        debug!(name = %entry.name, origin = %origin_dir.origin, "skipping non-database directory");
                        continue;
                    }
                };

                let modified = match self.fs.stat_modified_time(&entry.path) {
                    Ok(time) => Some(DateTime::<Utc>::from(time)),
                    Err(e) => {
                        warn!(path = %entry.path.display(), error = %e, "cannot read modification time");
                        None
                    }
                };

                entries.push(DiskEntry {
                    identifier,
                    path: entry.path,
                    modified,
                });
            }
        }

        entries.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(entries)
    }
}
