//! Serialized background hashing.
//!
//! One dedicated thread drains a FIFO queue of `(path, node_id)` requests,
//! computes the digest off the dispatch path, and publishes the result back
//! onto the bus as `HashCompleted` (or `HashError`). Exactly one request is
//! in flight at a time; the in-flight path is observable for tests and
//! status surfaces.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::error::Result;
use crate::hasher::ContentHasher;
use drift_model::{NodeId, SyncEvent};

/// Read-only view of the worker's outstanding requests, consumed by the
/// completion trackers. A path is pending from `submit` until just before
/// its completion event is published.
pub trait HashActivity: Send + Sync {
    fn is_pending(&self, path: &Path) -> bool;
}

enum HashTask {
    Digest { path: PathBuf, node_id: NodeId },
    /// Sentinel that stops the worker loop.
    Drain,
}

struct WorkerShared {
    /// Outstanding request count per path (queued plus in flight).
    pending: Mutex<HashMap<PathBuf, usize>>,
    /// Path currently being hashed, if any.
    in_flight: Mutex<Option<PathBuf>>,
    draining: AtomicBool,
}

impl WorkerShared {
    fn task_started(&self, path: &Path) {
        *self.in_flight.lock() = Some(path.to_owned());
    }

    /// Clear bookkeeping for a finished task. Runs before the completion
    /// event is published so trackers observing `is_pending` during that
    /// dispatch see the settled state.
    fn task_finished(&self, path: &Path) {
        let mut pending = self.pending.lock();
        if let Some(count) = pending.get_mut(path) {
            *count -= 1;
            if *count == 0 {
                pending.remove(path);
            }
        }
        drop(pending);
        *self.in_flight.lock() = None;
    }
}

/// FIFO hashing queue backed by a dedicated worker thread.
pub struct HashWorker {
    tx: mpsc::UnboundedSender<HashTask>,
    shared: Arc<WorkerShared>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl HashWorker {
    /// Start the worker thread. Completion events are published on `bus`
    /// from the worker's own thread, re-entering the serialized dispatch
    /// path there.
    pub fn spawn(
        bus: Arc<EventBus>,
        hasher: Arc<dyn ContentHasher>,
    ) -> Result<Arc<Self>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(WorkerShared {
            pending: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(None),
            draining: AtomicBool::new(false),
        });

        let loop_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("drift-hasher".into())
            .spawn(move || worker_loop(rx, loop_shared, bus, hasher))?;

        Ok(Arc::new(Self {
            tx,
            shared,
            thread: Mutex::new(Some(handle)),
        }))
    }

    /// Enqueue a hashing request. Never blocks; requests are processed in
    /// submission order. Submissions after `shutdown` are logged and dropped.
    pub fn submit(&self, path: impl Into<PathBuf>, node_id: NodeId) {
        let path = path.into();
        if self.shared.draining.load(Ordering::Acquire) {
            warn!(path = %path.display(), %node_id, "hash request after shutdown, dropping");
            return;
        }

        *self.shared.pending.lock().entry(path.clone()).or_insert(0) += 1;
        if self
            .tx
            .send(HashTask::Digest {
                path: path.clone(),
                node_id,
            })
            .is_err()
        {
            // Worker already gone; undo the pending claim.
            self.shared.task_finished(&path);
            warn!(path = %path.display(), "hash worker gone, request dropped");
        }
    }

    /// Enqueue the drain sentinel and wait for the worker thread to exit.
    /// Idempotent: later calls return once the first join completed.
    pub fn shutdown(&self) {
        self.shared.draining.store(true, Ordering::Release);
        let _ = self.tx.send(HashTask::Drain);
        if let Some(handle) = self.thread.lock().take()
            && handle.join().is_err()
        {
            warn!("hash worker thread panicked during shutdown");
        }
    }

    /// The path currently being hashed, if any.
    pub fn current(&self) -> Option<PathBuf> {
        self.shared.in_flight.lock().clone()
    }
}

impl HashActivity for HashWorker {
    fn is_pending(&self, path: &Path) -> bool {
        self.shared.pending.lock().contains_key(path)
    }
}

impl fmt::Debug for HashWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashWorker")
            .field("pending", &self.shared.pending.lock().len())
            .field("in_flight", &self.current())
            .field(
                "draining",
                &self.shared.draining.load(Ordering::Relaxed),
            )
            .finish()
    }
}

fn worker_loop(
    mut rx: mpsc::UnboundedReceiver<HashTask>,
    shared: Arc<WorkerShared>,
    bus: Arc<EventBus>,
    hasher: Arc<dyn ContentHasher>,
) {
    while let Some(task) = rx.blocking_recv() {
        let (path, node_id) = match task {
            HashTask::Drain => break,
            HashTask::Digest { path, node_id } => (path, node_id),
        };

        shared.task_started(&path);
        let outcome = hasher.digest(&path);
        shared.task_finished(&path);

        match outcome {
            Ok(digest) => {
                debug!(path = %path.display(), size = digest.size, "hashed");
                bus.publish(SyncEvent::HashCompleted { path, digest });
            }
            Err(err) => {
                warn!(path = %path.display(), %node_id, error = %err, "hashing failed");
                bus.publish(SyncEvent::HashError {
                    path,
                    error: err.to_string(),
                });
            }
        }
    }
    debug!("hash worker drained");
}
