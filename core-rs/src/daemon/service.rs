// CoordinatorService - The origin storage coordinator
//
// Responsibilities:
// - Own the task queue and its single worker
// - Accept client connections and their requests (via RequestDispatcher)
// - Release a connection's databases when it goes away
// - Create relative paths under the storage directory on request
// - Offer a flush barrier and a draining shutdown
//
// Architecture:
// - Caller threads: attach, dispatch, path resolution (no storage mutation)
// - Worker thread: WorkerContext (registry, disk, per-connection opens)
// - ConnectionSet: shared between both, mutex-guarded

use crate::config::ServiceConfig;
use crate::daemon::connections::{ClientConnection, ConnectionSet};
use crate::daemon::dispatcher::RequestDispatcher;
use crate::daemon::protocol::{ConnectionId, RawRequest};
use crate::daemon::worker::{RegisteredDatabase, WorkerContext};
use crate::drivers::{DatabaseEngine, DirectoryEngine, FileSystem, LocalFileSystem};
use crate::errors::{Result, StoreError};
use crate::origin::DatabaseIdentifier;
use crate::queue::{PendingReferences, PendingTask, TaskQueue};
use crate::storage::{DatabaseRegistry, PathResolver, StorageDirectory};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};

pub struct CoordinatorService {
    config: ServiceConfig,
    resolver: Arc<PathResolver>,
    queue: Arc<TaskQueue<WorkerContext>>,
    connections: ConnectionSet,
    dispatcher: RequestDispatcher,
    pending: PendingReferences<DatabaseIdentifier>,
}

impl CoordinatorService {
    /// Start on the local filesystem with the directory engine.
    pub fn start(config: ServiceConfig) -> Result<Self> {
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
        let engine: Arc<dyn DatabaseEngine> = Arc::new(DirectoryEngine::new(Arc::clone(&fs)));
        Self::start_with(config, fs, engine)
    }

    /// Start with explicit storage drivers.
    pub fn start_with(config: ServiceConfig, fs: Arc<dyn FileSystem>, engine: Arc<dyn DatabaseEngine>) -> Result<Self> {
        config.validate()?;

        let root = StorageDirectory::new(&config.storage_directory)?;
        fs.mkdir_all(root.path())?;
        let resolver = Arc::new(PathResolver::new(root, Arc::clone(&fs)));

        let connections = ConnectionSet::new();
        let pending = PendingReferences::new();
        let context = WorkerContext::new(
            DatabaseRegistry::new(engine),
            Arc::clone(&resolver),
            fs,
            connections.clone(),
            pending.clone(),
        );
        let queue = Arc::new(TaskQueue::start(config.queue, context)?);
        let dispatcher = RequestDispatcher::new(Arc::clone(&queue), connections.clone(), pending.clone());

        info!(
            storage = %resolver.root().display(),
            queue = ?config.queue,
            "coordinator started"
        );

        Ok(Self {
            config,
            resolver,
            queue,
            connections,
            dispatcher,
            pending,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn storage_directory(&self) -> &Path {
        self.resolver.root()
    }

    pub fn connections(&self) -> &ConnectionSet {
        &self.connections
    }

    /// Register a new client connection.
    pub fn attach(&self) -> ClientConnection {
        self.connections.attach()
    }

    /// Entry point for requests from the connection layer.
    pub fn on_request_arrived(&self, connection: ConnectionId, request: RawRequest) -> Result<()> {
        self.dispatcher.dispatch(connection, request)
    }

    /// Connection-layer notification that a client went away.
    ///
    /// Outstanding callbacks are dropped and the databases the connection
    /// opened are released on the worker. Unknown connections are ignored.
    pub fn on_connection_closed(&self, connection: ConnectionId) {
        let Some(dropped) = self.connections.detach(connection) else {
            return;
        };

        let task = PendingTask::new("release-connection", move |ctx: &mut WorkerContext| {
            ctx.release_connection(connection);
        });
        if let Err(e) = self.queue.enqueue(task) {
            warn!(
                connection = %connection,
                dropped_callbacks = dropped.len(),
                error = %e,
                "could not queue connection release; its handles stay open"
            );
        }
    }

    /// Create `relative` under the storage directory. Returns once the work
    /// is queued; the directory exists for every task queued afterwards.
    pub fn ensure_relative_path_exists(&self, relative: impl Into<PathBuf>) -> Result<()> {
        let relative = relative.into();
        // Reject escapes up front rather than on the worker
        self.resolver.absolute_path(&relative)?;

        self.queue.enqueue(PendingTask::new("ensure-path", move |ctx: &mut WorkerContext| {
            if let Err(e) = ctx.ensure_relative_path(&relative) {
                warn!(path = %relative.display(), error = %e, "failed to create storage path");
            }
        }))
    }

    /// Absolute form of a storage-relative path. Pure; safe from any thread.
    pub fn absolute_path(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        self.resolver.absolute_path(relative.as_ref())
    }

    /// Resolves once every task queued before this call has run.
    pub fn flush(&self) -> Result<oneshot::Receiver<()>> {
        self.queue.barrier()
    }

    /// Await [`flush`](Self::flush).
    pub async fn flushed(&self) -> Result<()> {
        self.flush()?.await.map_err(|_| StoreError::QueueClosed)
    }

    /// Snapshot of the registry, taken on the worker.
    pub async fn registered_databases(&self) -> Result<Vec<RegisteredDatabase>> {
        let (tx, rx) = oneshot::channel();
        self.queue.enqueue(PendingTask::new("registry-snapshot", move |ctx: &mut WorkerContext| {
            let _ = tx.send(ctx.registered());
        }))?;
        rx.await.map_err(|_| StoreError::QueueClosed)
    }

    /// Tasks queued but not yet started
    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    /// Queued tasks that name `identifier`
    pub fn pending_references(&self, identifier: &DatabaseIdentifier) -> usize {
        self.pending.count(identifier)
    }

    /// Stop accepting work and wait for the worker to drain the queue.
    pub fn shutdown(&self) -> Result<()> {
        info!(depth = self.queue.depth(), "coordinator shutting down");
        self.queue.shutdown()
    }
}
