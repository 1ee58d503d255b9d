//! Local filesystem driver
//!
//! Thin std::fs/walkdir implementation of the [`FileSystem`] collaborator.

use crate::drivers::traits::{DirEntry, EntryKind, FileSystem};
use crate::errors::{Result, StoreError};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::time::SystemTime;
use walkdir::WalkDir;

/// Filesystem backed by the local disk
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for LocalFileSystem {
    fn mkdir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|e| {
            StoreError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create {}: {}", path.display(), e),
            ))
        })
    }

    fn list_entries(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let read_dir = match fs::read_dir(path) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                EntryKind::Other
            };

            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                path: entry.path(),
                kind,
            });
        }

        // read_dir order is unspecified
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn delete_entry(&self, path: &Path) -> Result<()> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let result = if metadata.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn stat_modified_time(&self, path: &Path) -> Result<SystemTime> {
        let root_meta = fs::metadata(path)?;
        if !root_meta.is_dir() {
            return Ok(root_meta.modified()?);
        }

        // Newest file below the directory; directory mtimes only move when
        // entries are added or removed, so they are ignored unless there is
        // no file at all.
        let mut newest: Option<SystemTime> = None;
        for entry in WalkDir::new(path).follow_links(false) {
            let entry = entry.map_err(|e| StoreError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let modified = entry.metadata().map_err(|e| StoreError::Io(e.into()))?.modified()?;
            newest = Some(match newest {
                Some(current) if current >= modified => current,
                _ => modified,
            });
        }

        match newest {
            Some(time) => Ok(time),
            None => Ok(root_meta.modified()?),
        }
    }

    fn create_file(&self, path: &Path, contents: &[u8]) -> Result<bool> {
        let mut file = match fs::File::options().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        file.write_all(contents)?;
        Ok(true)
    }
}
