//! Collaborator traits for the storage coordinator
//!
//! The coordinator never touches the disk or a database engine directly.
//! Everything goes through these two seams:
//! - FileSystem: directory and file creation, listing, deletion, mtime
//! - DatabaseEngine: open/close/delete of one per-origin database
//!
//! Both are only ever driven from the worker thread, but implementations
//! must be `Send + Sync` because the service hands them to that thread.

use crate::errors::Result;
use crate::origin::DatabaseIdentifier;
use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Kind of a directory entry returned by [`FileSystem::list_entries`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Other,
}

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Final path component
    pub name: String,

    /// Absolute path of the entry
    pub path: PathBuf,

    pub kind: EntryKind,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Filesystem collaborator
///
/// # Semantics
///
/// - `mkdir_all` succeeds when the directory already exists
/// - `list_entries` on a missing directory returns an empty listing
/// - `delete_entry` removes files and whole directory trees; a missing
///   entry is not an error
/// - `stat_modified_time` reports the newest modification time found at
///   or below `path`
/// - `create_file` writes a new file and returns `false` without touching
///   it when the file already exists
pub trait FileSystem: Send + Sync {
    fn mkdir_all(&self, path: &Path) -> Result<()>;

    fn list_entries(&self, path: &Path) -> Result<Vec<DirEntry>>;

    fn delete_entry(&self, path: &Path) -> Result<()>;

    fn stat_modified_time(&self, path: &Path) -> Result<SystemTime>;

    fn create_file(&self, path: &Path, contents: &[u8]) -> Result<bool>;
}

/// Open database as handed out by an engine
///
/// The engine decides what `state` is; the coordinator only stores it and
/// gives it back on close/delete.
pub struct EngineDatabase {
    /// Absolute directory of the database
    pub path: PathBuf,

    /// Engine-specific state (opaque to the coordinator)
    pub state: Box<dyn Any + Send>,
}

impl fmt::Debug for EngineDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineDatabase")
            .field("path", &self.path)
            .field("state", &"<opaque>")
            .finish()
    }
}

/// Database engine collaborator
pub trait DatabaseEngine: Send + Sync {
    /// Open (creating if needed) the database for `identifier` at `path`
    fn open(&self, identifier: &DatabaseIdentifier, path: &Path) -> Result<EngineDatabase>;

    /// Close a database, keeping its persisted data
    fn close(&self, database: EngineDatabase) -> Result<()>;

    /// Close a database and delete everything it persisted
    fn delete_underlying(&self, database: EngineDatabase) -> Result<()>;
}
