//! Drivers module for the storage collaborators
//!
//! Provides the collaborator traits (FileSystem, DatabaseEngine) and implementations:
//! - LocalFileSystem: std::fs + walkdir
//! - DirectoryEngine: one directory and one file per database

mod traits;
mod filesystem;
pub mod engine;

pub use traits::{DatabaseEngine, DirEntry, EngineDatabase, EntryKind, FileSystem};
pub use filesystem::LocalFileSystem;
pub use engine::{DirectoryEngine, DATABASE_FILENAME};
