//! Shared helpers for contract and integration tests
//!
//! Uses tempfile for isolation - NO /tmp pollution

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use originstore_core::drivers::{DirEntry, DirectoryEngine, FileSystem, LocalFileSystem, DATABASE_FILENAME};
use originstore_core::{
    ClientConnection, CoordinatorService, DatabaseIdentifier, QueuePolicy, RawRequest, Reply, SecurityOrigin,
    ServiceConfig,
};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

pub const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

pub fn storage_root(temp: &TempDir) -> PathBuf {
    temp.path().join("store")
}

pub fn start_service(temp: &TempDir) -> CoordinatorService {
    CoordinatorService::start(ServiceConfig::new(storage_root(temp))).unwrap()
}

pub fn start_with_fs(temp: &TempDir, policy: QueuePolicy, fs: Arc<dyn FileSystem>) -> CoordinatorService {
    let engine = Arc::new(DirectoryEngine::new(Arc::clone(&fs)));
    let config = ServiceConfig::new(storage_root(temp)).with_queue(policy);
    CoordinatorService::start_with(config, fs, engine).unwrap()
}

/// Service whose worker blocks inside the first directory listing until the
/// returned sender fires. Lets a test queue work behind a parked worker.
pub fn start_gated(temp: &TempDir, policy: QueuePolicy) -> (CoordinatorService, GateHandle) {
    let (fs, gate) = GatedFileSystem::new();
    (start_with_fs(temp, policy, Arc::new(fs)), gate)
}

pub struct GateHandle {
    entered: Receiver<()>,
    release: Sender<()>,
}

impl GateHandle {
    /// Wait until the worker is parked at the gate
    pub fn wait_parked(&self) {
        self.entered.recv_timeout(REPLY_TIMEOUT).expect("worker never reached the gate");
    }

    pub fn open(self) {
        self.release.send(()).unwrap();
    }
}

pub struct GatedFileSystem {
    inner: LocalFileSystem,
    gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

impl GatedFileSystem {
    pub fn new() -> (Self, GateHandle) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let fs = Self {
            inner: LocalFileSystem::new(),
            gate: Mutex::new(Some((entered_tx, release_rx))),
        };
        (
            fs,
            GateHandle {
                entered: entered_rx,
                release: release_tx,
            },
        )
    }
}

impl FileSystem for GatedFileSystem {
    fn mkdir_all(&self, path: &Path) -> originstore_core::Result<()> {
        self.inner.mkdir_all(path)
    }

    fn list_entries(&self, path: &Path) -> originstore_core::Result<Vec<DirEntry>> {
        let gate = self.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            entered.send(()).unwrap();
            release.recv().unwrap();
        }
        self.inner.list_entries(path)
    }

    fn delete_entry(&self, path: &Path) -> originstore_core::Result<()> {
        self.inner.delete_entry(path)
    }

    fn stat_modified_time(&self, path: &Path) -> originstore_core::Result<SystemTime> {
        self.inner.stat_modified_time(path)
    }

    fn create_file(&self, path: &Path, contents: &[u8]) -> originstore_core::Result<bool> {
        self.inner.create_file(path, contents)
    }
}

/// Filesystem that refuses to delete or create anything under paths
/// containing `needle`
pub struct StubbornFileSystem {
    inner: LocalFileSystem,
    needle: String,
}

impl StubbornFileSystem {
    pub fn new(needle: impl Into<String>) -> Self {
        Self {
            inner: LocalFileSystem::new(),
            needle: needle.into(),
        }
    }

    fn refuse(&self, path: &Path) -> originstore_core::Result<()> {
        if path.to_string_lossy().contains(&self.needle) {
            return Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only").into());
        }
        Ok(())
    }
}

impl FileSystem for StubbornFileSystem {
    fn mkdir_all(&self, path: &Path) -> originstore_core::Result<()> {
        self.inner.mkdir_all(path)
    }

    fn list_entries(&self, path: &Path) -> originstore_core::Result<Vec<DirEntry>> {
        self.inner.list_entries(path)
    }

    fn delete_entry(&self, path: &Path) -> originstore_core::Result<()> {
        self.refuse(path)?;
        self.inner.delete_entry(path)
    }

    fn stat_modified_time(&self, path: &Path) -> originstore_core::Result<SystemTime> {
        self.inner.stat_modified_time(path)
    }

    fn create_file(&self, path: &Path, contents: &[u8]) -> originstore_core::Result<bool> {
        self.refuse(path)?;
        self.inner.create_file(path, contents)
    }
}

pub fn origin(url: &str) -> SecurityOrigin {
    SecurityOrigin::parse(url).unwrap()
}

pub fn database(url: &str, name: &str) -> DatabaseIdentifier {
    DatabaseIdentifier::new(origin(url), name)
}

/// Lay down a database directly on disk, as a previous run would have left it
pub fn write_database(root: &Path, identifier: &DatabaseIdentifier, modified: DateTime<Utc>) -> PathBuf {
    let dir = root.join(identifier.relative_path());
    fs::create_dir_all(&dir).unwrap();
    let file_path = dir.join(DATABASE_FILENAME);
    fs::write(&file_path, b"{}").unwrap();
    let file = fs::File::options().write(true).open(&file_path).unwrap();
    file.set_modified(modified.into()).unwrap();
    dir
}

pub fn send(service: &CoordinatorService, client: &ClientConnection, kind: &str, parameters: Value, callback: u64) {
    service
        .on_request_arrived(client.id(), RawRequest::new(kind, parameters, callback))
        .unwrap();
}

pub async fn next_reply(client: &mut ClientConnection) -> Reply {
    tokio::time::timeout(REPLY_TIMEOUT, client.next_reply())
        .await
        .expect("timed out waiting for reply")
        .expect("connection closed")
}

/// Send one request and wait for its reply
pub async fn call(
    service: &CoordinatorService,
    client: &mut ClientConnection,
    kind: &str,
    parameters: Value,
    callback: u64,
) -> Reply {
    send(service, client, kind, parameters, callback);
    let reply = next_reply(client).await;
    assert_eq!(reply.callback_id.0, callback, "reply must echo the callback id");
    reply
}
