// storage/paths.rs - Relative -> absolute path mapping below the storage root
//
// Every per-origin path handed to the resolver is relative to the storage
// directory. Absolute paths and `..` components are rejected so a path can
// never leave the root, whatever a client managed to smuggle into it.

use crate::drivers::FileSystem;
use crate::errors::{Result, StoreError};
use crate::origin::DatabaseIdentifier;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Process-wide root for persisted per-origin data
///
/// Built once when the service starts and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageDirectory(PathBuf);

impl StorageDirectory {
    pub fn new<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(StoreError::Config("storage directory must not be empty".to_string()));
        }
        Ok(Self(path))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

/// Maps relative per-origin paths to absolute ones and creates directories
pub struct PathResolver {
    root: StorageDirectory,
    fs: Arc<dyn FileSystem>,
}

impl PathResolver {
    pub fn new(root: StorageDirectory, fs: Arc<dyn FileSystem>) -> Self {
        Self { root, fs }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Pure mapping `StorageDirectory/relative`. No filesystem access.
    pub fn absolute_path(&self, relative: &Path) -> Result<PathBuf> {
        let mut absolute = self.root.path().to_path_buf();
        for component in relative.components() {
            match component {
                Component::Normal(part) => absolute.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StoreError::InvalidPath(format!(
                        "{} escapes the storage directory",
                        relative.display()
                    )));
                }
            }
        }
        Ok(absolute)
    }

    /// Create `StorageDirectory/relative` if absent. Safe to repeat.
    pub fn ensure_exists(&self, relative: &Path) -> Result<PathBuf> {
        let absolute = self.absolute_path(relative)?;
        self.fs.mkdir_all(&absolute)?;
        debug!(path = %absolute.display(), "ensured directory");
        Ok(absolute)
    }

    /// Absolute directory of a database
    pub fn database_path(&self, identifier: &DatabaseIdentifier) -> PathBuf {
        self.root.path().join(identifier.relative_path())
    }

    /// Absolute directory of an origin
    pub fn origin_path(&self, origin_directory: &str) -> Result<PathBuf> {
        self.absolute_path(Path::new(origin_directory))
    }
}
