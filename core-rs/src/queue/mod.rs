//! Single-worker task queue
//!
//! Many producers, one consumer. `enqueue` never blocks: it either hands the
//! task to the channel or fails straight away (bounded queue full, or queue
//! closed). A dedicated thread owns the worker context `C` and runs tasks one
//! at a time in enqueue order, so everything a task touches through `C` needs
//! no locking of its own.
//!
//! A task that panics is logged and dropped; the worker carries on with the
//! next one.

use crate::config::QueuePolicy;
use crate::errors::{Result, StoreError};
use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

/// Name of the worker thread
pub const WORKER_THREAD_NAME: &str = "originstore-worker";

/// Deferred unit of work for the worker
pub struct PendingTask<C> {
    label: &'static str,
    work: Box<dyn FnOnce(&mut C) + Send + 'static>,
}

impl<C> PendingTask<C> {
    pub fn new<F>(label: &'static str, work: F) -> Self
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        Self {
            label,
            work: Box::new(work),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

enum TaskSender<C> {
    Bounded { sender: SyncSender<PendingTask<C>>, capacity: usize },
    Unbounded(Sender<PendingTask<C>>),
}

/// FIFO queue drained by one dedicated worker thread
pub struct TaskQueue<C> {
    sender: Mutex<Option<TaskSender<C>>>,
    depth: Arc<AtomicUsize>,
    executed: Arc<AtomicU64>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Send + 'static> TaskQueue<C> {
    /// Spawn the worker thread, handing it ownership of `context`.
    pub fn start(policy: QueuePolicy, context: C) -> Result<Self> {
        let depth = Arc::new(AtomicUsize::new(0));
        let executed = Arc::new(AtomicU64::new(0));

        let (sender, receiver) = match policy {
            QueuePolicy::Bounded { capacity } => {
                if capacity == 0 {
                    return Err(StoreError::Config("queue capacity must be greater than zero".to_string()));
                }
                let (sender, receiver) = mpsc::sync_channel(capacity);
                (TaskSender::Bounded { sender, capacity }, receiver)
            }
            QueuePolicy::Unbounded => {
                let (sender, receiver) = mpsc::channel();
                (TaskSender::Unbounded(sender), receiver)
            }
        };

        let worker = {
            let depth = Arc::clone(&depth);
            let executed = Arc::clone(&executed);
            thread::Builder::new()
                .name(WORKER_THREAD_NAME.to_string())
                .spawn(move || run_worker(context, receiver, depth, executed))
                .map_err(|e| StoreError::Worker(format!("failed to spawn worker thread: {}", e)))?
        };

        info!(?policy, "task queue started");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            depth,
            executed,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Append a task. Returns immediately.
    pub fn enqueue(&self, task: PendingTask<C>) -> Result<()> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            return Err(StoreError::QueueClosed);
        };

        let label = task.label;
        self.depth.fetch_add(1, Ordering::AcqRel);
        let sent = match sender {
            TaskSender::Bounded { sender, capacity } => match sender.try_send(task) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(StoreError::QueueFull { capacity: *capacity }),
                Err(TrySendError::Disconnected(_)) => Err(StoreError::QueueClosed),
            },
            TaskSender::Unbounded(sender) => sender.send(task).map_err(|_| StoreError::QueueClosed),
        };

        if sent.is_err() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
        } else {
            debug!(task = label, "enqueued");
        }
        sent
    }

    /// Receiver resolved once every task enqueued before this call has run.
    pub fn barrier(&self) -> Result<oneshot::Receiver<()>> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(PendingTask::new("barrier", move |_| {
            let _ = tx.send(());
        }))?;
        Ok(rx)
    }

    /// Tasks accepted but not yet picked up by the worker
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Tasks the worker has finished (including ones that panicked)
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    /// Stop accepting tasks, let the worker drain what was accepted, join it.
    pub fn shutdown(&self) -> Result<()> {
        drop(self.sender.lock().unwrap_or_else(PoisonError::into_inner).take());

        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = worker {
            if worker.thread().id() == thread::current().id() {
                return Err(StoreError::Worker("shutdown called from the worker thread".to_string()));
            }
            worker
                .join()
                .map_err(|_| StoreError::Worker("worker thread panicked".to_string()))?;
            info!(executed = self.executed(), "task queue stopped");
        }
        Ok(())
    }
}

impl<C> Drop for TaskQueue<C> {
    fn drop(&mut self) {
        // Closing the channel is enough for the worker to exit on its own
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

fn run_worker<C>(mut context: C, receiver: Receiver<PendingTask<C>>, depth: Arc<AtomicUsize>, executed: Arc<AtomicU64>) {
    debug!("worker started");

    while let Ok(task) = receiver.recv() {
        depth.fetch_sub(1, Ordering::AcqRel);

        let PendingTask { label, work } = task;
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&mut context)));
        executed.fetch_add(1, Ordering::AcqRel);

        match outcome {
            Ok(()) => debug!(task = label, elapsed_us = started.elapsed().as_micros() as u64, "task finished"),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                error!(task = label, panic = %message, "task panicked; continuing with next task");
            }
        }
    }

    debug!("queue closed; worker exiting");
}

/// Per-key count of queued tasks that still reference a key
///
/// Producers take a [`PendingReference`] when they enqueue a task naming a
/// key; the reference is released when the task (and the guard it owns) is
/// dropped, whether the task ran or not.
pub struct PendingReferences<K> {
    counts: Arc<Mutex<HashMap<K, usize>>>,
}

impl<K> Clone for PendingReferences<K> {
    fn clone(&self) -> Self {
        Self {
            counts: Arc::clone(&self.counts),
        }
    }
}

impl<K: Eq + Hash + Clone> Default for PendingReferences<K> {
    fn default() -> Self {
        Self {
            counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K: Eq + Hash + Clone> PendingReferences<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reference(&self, key: K) -> PendingReference<K> {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        *counts.entry(key.clone()).or_insert(0) += 1;
        PendingReference {
            key,
            counts: Arc::clone(&self.counts),
        }
    }

    pub fn count(&self, key: &K) -> usize {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts.get(key).copied().unwrap_or(0)
    }
}

/// Guard held by a queued task; see [`PendingReferences`]
pub struct PendingReference<K: Eq + Hash> {
    key: K,
    counts: Arc<Mutex<HashMap<K, usize>>>,
}

impl<K: Eq + Hash> PendingReference<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash> Drop for PendingReference<K> {
    fn drop(&mut self) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = counts.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&self.key);
            }
        }
    }
}
