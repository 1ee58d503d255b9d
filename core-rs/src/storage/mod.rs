// storage/mod.rs - Storage subsystem
//
// Leaf components driven only by the worker: path resolution, the handle
// registry, the on-disk scanner and bulk origin data management.

pub mod paths;
pub mod registry;
pub mod scanner;
pub mod maintenance;

pub use paths::{PathResolver, StorageDirectory};
pub use registry::{DatabaseHandle, DatabaseRegistry, Release};
pub use scanner::{DiskEntry, OriginDirectory, OriginScanner};
pub use maintenance::{DeletionFilter, OriginDataManager};
