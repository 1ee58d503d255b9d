//! Directory-backed database engine
//!
//! Stand-in for a real per-origin database engine. Each database is a
//! directory holding a single `database.db` file whose header records the
//! identifier it belongs to. Good enough for the coordinator, which only
//! cares that databases exist on disk, have a modification time, and can
//! be deleted.

use crate::drivers::traits::{DatabaseEngine, EngineDatabase, FileSystem};
use crate::errors::{Result, StoreError};
use crate::origin::DatabaseIdentifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// File created inside every database directory
pub const DATABASE_FILENAME: &str = "database.db";

/// Header written to a freshly created database file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseHeader {
    pub origin: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Per-open state kept inside [`EngineDatabase::state`]
#[derive(Debug)]
struct DirectoryDatabase {
    file: PathBuf,
    opened_at: DateTime<Utc>,
}

/// Engine storing each database as a directory with one file
#[derive(Clone)]
pub struct DirectoryEngine {
    fs: Arc<dyn FileSystem>,
}

impl DirectoryEngine {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    fn unwrap_state(database: &EngineDatabase) -> Result<&DirectoryDatabase> {
        database
            .state
            .downcast_ref::<DirectoryDatabase>()
            .ok_or_else(|| StoreError::Engine(format!("foreign database state for {}", database.path.display())))
    }
}

impl DatabaseEngine for DirectoryEngine {
    fn open(&self, identifier: &DatabaseIdentifier, path: &Path) -> Result<EngineDatabase> {
        self.fs.mkdir_all(path)?;

        let file = path.join(DATABASE_FILENAME);
        let header = DatabaseHeader {
            origin: identifier.origin.to_string(),
            name: identifier.name.clone(),
            created_at: Utc::now(),
        };
        if self.fs.create_file(&file, &serde_json::to_vec_pretty(&header)?)? {
            debug!(database = %identifier, path = %file.display(), "created database file");
        }

        Ok(EngineDatabase {
            path: path.to_path_buf(),
            state: Box::new(DirectoryDatabase {
                file,
                opened_at: Utc::now(),
            }),
        })
    }

    fn close(&self, database: EngineDatabase) -> Result<()> {
        let state = Self::unwrap_state(&database)?;
        debug!(
            path = %state.file.display(),
            open_for_ms = (Utc::now() - state.opened_at).num_milliseconds(),
            "closed database"
        );
        Ok(())
    }

    fn delete_underlying(&self, database: EngineDatabase) -> Result<()> {
        Self::unwrap_state(&database)?;
        self.fs.delete_entry(&database.path)
    }
}

/// Read the header of a database file created by [`DirectoryEngine`]
pub fn read_header(database_dir: &Path) -> Result<DatabaseHeader> {
    let content = fs::read(database_dir.join(DATABASE_FILENAME))?;
    Ok(serde_json::from_slice(&content)?)
}
