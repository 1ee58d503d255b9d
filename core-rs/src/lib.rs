//! # Originstore Core - Per-origin database storage coordinator
//!
//! A long-lived service that owns the databases web content stores per
//! security origin. Clients attach, send requests (enumerate origins, delete
//! data by origin, by modification date or entirely, open and close
//! databases) and receive replies correlated by callback id.
//!
//! ## Core Principle
//!
//! **One worker owns all storage state**: the database registry and every
//! on-disk mutation are touched only by a single worker thread that drains a
//! FIFO task queue. Request handling on caller threads never blocks on disk.
//!
//! ## Architecture
//!
//! ```text
//!   clients ──► CoordinatorService ──► RequestDispatcher ──► TaskQueue
//!      ▲              │                                         │
//!      │        ConnectionSet ◄──────── replies ────────── worker thread
//!      │                                                        │
//!      └──────────────────────────────────────── DatabaseRegistry + disk
//! ```
//!
//! ## On-disk layout
//!
//! ```text
//! <storageDirectory>/<scheme>_<host>_<port>/idb-<hex(name)>/database.db
//! ```

pub mod errors;
pub mod config;
pub mod origin;
pub mod drivers;
pub mod storage;
pub mod queue;
pub mod daemon;

pub use errors::{Result, StoreError};
pub use config::{LoggingConfig, QueuePolicy, ServiceConfig};
pub use origin::{DatabaseIdentifier, SecurityOrigin};
pub use drivers::{DatabaseEngine, DirectoryEngine, FileSystem, LocalFileSystem};
pub use storage::{DatabaseRegistry, DeletionFilter, OriginDataManager, PathResolver, StorageDirectory};
pub use queue::{PendingTask, TaskQueue};
pub use daemon::{
    CallbackId, ClientConnection, ConnectionId, CoordinatorService, Operation, RawRequest, Reply, ReplyPayload,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default storage root when none is configured
pub const DEFAULT_STORAGE_DIRECTORY: &str = "/var/lib/originstore";
