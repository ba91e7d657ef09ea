//! Transfer completion tracking.
//!
//! The network layer announces that a transfer's bytes have settled with a
//! commit event, but the rest of the daemon must not treat the transfer as
//! finished while local activity can still change the file: open handles may
//! be writing it, and a just-written file is unverified until the hash
//! worker confirms its digest. One [`TransferTracker`] per direction watches
//! the bus, blocks each committed path until it is quiescent, and then
//! replays the commit payload as the matching finished event.
//!
//! A path is releasable when it has a pending record, no outstanding open
//! count, and no outstanding hash request. Renames and directory moves that
//! happen while a path is blocked reroute the bookkeeping to the new path;
//! create/delete invalidate the record without ever firing finished.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::bus::{EventBus, Subscriber};
use crate::error::Result;
use crate::hash_worker::HashActivity;
use crate::metadata::MetadataIndex;
use crate::paths::rewrite_prefix;
use drift_model::{SyncEvent, TransferHandle};

/// Which transfer direction a tracker instance reconciles. The state machine
/// is identical; only the commit/finished event variants differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

impl Direction {
    fn commit_payload<'a>(
        &self,
        event: &'a SyncEvent,
    ) -> Option<&'a TransferHandle> {
        match (self, event) {
            (Direction::Download, SyncEvent::DownloadCommit(handle)) => {
                Some(handle)
            }
            (Direction::Upload, SyncEvent::UploadCommit(handle)) => {
                Some(handle)
            }
            _ => None,
        }
    }

    fn finished_event(&self, handle: TransferHandle) -> SyncEvent {
        match self {
            Direction::Download => SyncEvent::DownloadFinished(handle),
            Direction::Upload => SyncEvent::UploadFinished(handle),
        }
    }

    fn tracker_name(&self) -> &'static str {
        match self {
            Direction::Download => "download-tracker",
            Direction::Upload => "upload-tracker",
        }
    }
}

#[derive(Default)]
struct TrackerState {
    /// Pending transfer per path, with the commit payload to replay.
    blocked: HashMap<PathBuf, TransferHandle>,
    /// Open notifications not yet matched by a close, for every path seen.
    opened: HashMap<PathBuf, u32>,
    /// Paths whose content hash is outstanding.
    hashing: HashSet<PathBuf>,
}

impl TrackerState {
    /// Reroute all bookkeeping for `from` to `to`. An existing entry at `to`
    /// is overwritten; the moved file is the one the obligation follows.
    fn rename(&mut self, from: &Path, to: &Path) {
        if let Some(handle) = self.blocked.remove(from) {
            self.blocked.insert(to.to_owned(), handle);
        }
        if let Some(count) = self.opened.remove(from) {
            self.opened.insert(to.to_owned(), count);
        }
        if self.hashing.remove(from) {
            self.hashing.insert(to.to_owned());
        }
    }

    /// Apply a directory move to every key under `from`, returning the new
    /// locations of the paths that carry a pending record.
    fn rewrite_dir(&mut self, from: &Path, to: &Path) -> Vec<PathBuf> {
        fn moves(
            keys: impl Iterator<Item = PathBuf>,
            from: &Path,
            to: &Path,
        ) -> Vec<(PathBuf, PathBuf)> {
            keys.filter_map(|old| {
                rewrite_prefix(&old, from, to).map(|new| (old, new))
            })
            .collect()
        }

        let blocked_moves =
            moves(self.blocked.keys().cloned(), from, to);
        for (old, new) in &blocked_moves {
            if let Some(handle) = self.blocked.remove(old) {
                self.blocked.insert(new.clone(), handle);
            }
        }

        for (old, new) in moves(self.opened.keys().cloned(), from, to) {
            if let Some(count) = self.opened.remove(&old) {
                self.opened.insert(new, count);
            }
        }

        for (old, new) in moves(self.hashing.iter().cloned(), from, to) {
            self.hashing.remove(&old);
            self.hashing.insert(new);
        }

        blocked_moves.into_iter().map(|(_, new)| new).collect()
    }

    fn discard(&mut self, path: &Path) -> Option<TransferHandle> {
        self.opened.remove(path);
        self.hashing.remove(path);
        self.blocked.remove(path)
    }
}

/// Blocks transfer-finished notifications until the path is quiescent.
pub struct TransferTracker {
    direction: Direction,
    index: Arc<dyn MetadataIndex>,
    hash_activity: Arc<dyn HashActivity>,
    state: Mutex<TrackerState>,
}

impl TransferTracker {
    pub fn new(
        direction: Direction,
        index: Arc<dyn MetadataIndex>,
        hash_activity: Arc<dyn HashActivity>,
    ) -> Arc<Self> {
        Arc::new(Self {
            direction,
            index,
            hash_activity,
            state: Mutex::new(TrackerState::default()),
        })
    }

    /// Whether `path` currently carries a pending transfer record.
    pub fn is_tracked(&self, path: &Path) -> bool {
        self.state.lock().blocked.contains_key(path)
    }

    /// Outstanding open count for `path` (zero when absent).
    pub fn open_count(&self, path: &Path) -> u32 {
        self.state.lock().opened.get(path).copied().unwrap_or(0)
    }

    /// Whether `path` is blocked on an outstanding hash.
    pub fn is_awaiting_hash(&self, path: &Path) -> bool {
        self.state.lock().hashing.contains(path)
    }

    fn on_commit(&self, handle: &TransferHandle, bus: &EventBus) {
        let Some(path) =
            self.index.resolve_path(&handle.share_id, &handle.node_id)
        else {
            // The node may have been removed by a concurrent operation; the
            // commit's sender owns its own retry policy, so just drop it.
            warn!(
                share_id = %handle.share_id,
                node_id = %handle.node_id,
                "commit for unresolvable node, dropping"
            );
            return;
        };

        let release = {
            let mut state = self.state.lock();
            if self.hash_activity.is_pending(&path) {
                // Remember the outstanding request so the completion event
                // clears it even if the worker answers for a renamed path.
                state.hashing.insert(path.clone());
            }
            if state.opened.contains_key(&path)
                || state.hashing.contains(&path)
            {
                debug!(
                    path = %path.display(),
                    node_id = %handle.node_id,
                    "transfer blocked until path settles"
                );
                state.blocked.insert(path.clone(), handle.clone());
                None
            } else {
                Some(handle.clone())
            }
        };

        if let Some(handle) = release {
            bus.publish(self.direction.finished_event(handle));
        }
    }

    fn on_open(&self, path: &Path) {
        *self
            .state
            .lock()
            .opened
            .entry(path.to_owned())
            .or_insert(0) += 1;
    }

    fn on_close_nowrite(&self, path: &Path, bus: &EventBus) {
        let release = {
            let mut state = self.state.lock();
            match state.opened.get_mut(path) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    None
                }
                Some(_) => {
                    state.opened.remove(path);
                    self.try_release(&mut state, path)
                }
                // Unmatched close: never underflow, nothing to re-check.
                None => None,
            }
        };
        self.fire(release, bus);
    }

    fn on_close_write(&self, path: &Path) {
        let mut state = self.state.lock();
        // The content changed under us: open/close counting is no longer
        // evidence of settlement, so a tracked path must now wait for the
        // hash that this write triggers.
        state.opened.remove(path);
        if state.blocked.contains_key(path) {
            state.hashing.insert(path.to_owned());
        }
    }

    fn on_hash_settled(
        &self,
        path: &Path,
        failure: Option<&str>,
        bus: &EventBus,
    ) {
        let release = {
            let mut state = self.state.lock();
            let was_waiting = state.hashing.remove(path);
            if let Some(error) = failure
                && was_waiting
            {
                // Cannot validate the content, but hanging forever is worse;
                // stop blocking on the hash axis.
                warn!(
                    path = %path.display(),
                    error,
                    "hash failed for blocked path, releasing hash hold"
                );
            }
            self.try_release(&mut state, path)
        };
        self.fire(release, bus);
    }

    fn on_invalidate(&self, path: &Path) {
        let mut state = self.state.lock();
        if let Some(handle) = state.discard(path) {
            debug!(
                path = %path.display(),
                node_id = %handle.node_id,
                "pending transfer discarded, path was recreated or deleted"
            );
        }
    }

    fn on_file_move(&self, from: &Path, to: &Path, bus: &EventBus) {
        let release = {
            let mut state = self.state.lock();
            state.rename(from, to);
            self.try_release(&mut state, to)
        };
        self.fire(release, bus);
    }

    fn on_dir_move(&self, from: &Path, to: &Path, bus: &EventBus) {
        let released: Vec<TransferHandle> = {
            let mut state = self.state.lock();
            let moved = state.rewrite_dir(from, to);
            moved
                .iter()
                .filter_map(|path| self.try_release(&mut state, path))
                .collect()
        };
        for handle in released {
            bus.publish(self.direction.finished_event(handle));
        }
    }

    /// Remove and return the record for `path` if it is releasable: record
    /// present, no open count, no outstanding hash. Must be re-run after
    /// every state mutation, not only the one that created the record.
    fn try_release(
        &self,
        state: &mut TrackerState,
        path: &Path,
    ) -> Option<TransferHandle> {
        if !state.blocked.contains_key(path) {
            return None;
        }
        if state.opened.contains_key(path) || state.hashing.contains(path) {
            return None;
        }
        if self.hash_activity.is_pending(path) {
            state.hashing.insert(path.to_owned());
            return None;
        }
        state.blocked.remove(path)
    }

    /// Publish outside the state lock: the dispatch is re-entrant and may
    /// land back in this tracker.
    fn fire(&self, release: Option<TransferHandle>, bus: &EventBus) {
        if let Some(handle) = release {
            bus.publish(self.direction.finished_event(handle));
        }
    }
}

impl Subscriber for TransferTracker {
    fn name(&self) -> &str {
        self.direction.tracker_name()
    }

    fn handle_event(&self, event: &SyncEvent, bus: &EventBus) -> Result<()> {
        if let Some(handle) = self.direction.commit_payload(event) {
            self.on_commit(handle, bus);
            return Ok(());
        }

        match event {
            SyncEvent::FileOpen { path } => self.on_open(path),
            SyncEvent::FileCloseNoWrite { path } => {
                self.on_close_nowrite(path, bus)
            }
            SyncEvent::FileCloseWrite { path } => self.on_close_write(path),
            SyncEvent::FileCreate { path } | SyncEvent::FileDelete { path } => {
                self.on_invalidate(path)
            }
            SyncEvent::FileMove { path_from, path_to } => {
                self.on_file_move(path_from, path_to, bus)
            }
            SyncEvent::DirMove { path_from, path_to } => {
                self.on_dir_move(path_from, path_to, bus)
            }
            SyncEvent::HashCompleted { path, .. } => {
                self.on_hash_settled(path, None, bus)
            }
            SyncEvent::HashError { path, error } => {
                self.on_hash_settled(path, Some(error), bus)
            }
            // Everything else passes through untouched; the tracker is a
            // pure observer for events it does not interpret.
            _ => {}
        }
        Ok(())
    }
}

impl fmt::Debug for TransferTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TransferTracker")
            .field("direction", &self.direction)
            .field("blocked", &state.blocked.len())
            .field("opened", &state.opened.len())
            .field("hashing", &state.hashing.len())
            .finish()
    }
}
