//! End-to-end tracker behavior through a real bus: commits block while a
//! path has open handles or an outstanding hash, release exactly once when
//! the path settles, survive renames and directory moves, and are discarded
//! by create/delete.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use drift_core::{
    Direction, EventBus, HashActivity, InMemoryMetadataIndex, Result,
    Subscriber, TransferTracker,
};
use drift_model::{SyncEvent, TransferHandle};

/// Records every event it sees, in order.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<SyncEvent>>,
}

impl Recorder {
    fn take(&self) -> Vec<SyncEvent> {
        std::mem::take(&mut *self.seen.lock())
    }
}

impl Subscriber for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn handle_event(&self, event: &SyncEvent, _bus: &EventBus) -> Result<()> {
        self.seen.lock().push(event.clone());
        Ok(())
    }
}

/// Stand-in for the hash worker's pending surface, controlled by the test.
#[derive(Default)]
struct FakeHashActivity {
    pending: Mutex<HashSet<PathBuf>>,
}

impl FakeHashActivity {
    fn set_pending(&self, path: impl Into<PathBuf>) {
        self.pending.lock().insert(path.into());
    }

    fn clear_pending(&self, path: &Path) {
        self.pending.lock().remove(path);
    }
}

impl HashActivity for FakeHashActivity {
    fn is_pending(&self, path: &Path) -> bool {
        self.pending.lock().contains(path)
    }
}

struct Harness {
    bus: Arc<EventBus>,
    index: Arc<InMemoryMetadataIndex>,
    hash: Arc<FakeHashActivity>,
    recorder: Arc<Recorder>,
    tracker: Arc<TransferTracker>,
}

impl Harness {
    fn new(direction: Direction) -> Self {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init()
            .ok();

        let bus = Arc::new(EventBus::new());
        let index = Arc::new(InMemoryMetadataIndex::new());
        let hash = Arc::new(FakeHashActivity::default());
        let recorder = Arc::new(Recorder::default());
        let tracker = TransferTracker::new(
            direction,
            index.clone(),
            hash.clone(),
        );

        // The recorder subscribes ahead of the tracker so it observes events
        // in the order external listeners do: trigger first, finished after.
        bus.subscribe(recorder.clone());
        bus.subscribe(tracker.clone());

        Self {
            bus,
            index,
            hash,
            recorder,
            tracker,
        }
    }

    fn download() -> Self {
        Self::new(Direction::Download)
    }

    /// Register a node and return its local path.
    fn node(&self, node_id: &str, path: &str) -> PathBuf {
        self.index.set_node("", node_id, path);
        PathBuf::from(path)
    }

    fn open(&self, path: &Path) {
        self.bus.publish(SyncEvent::FileOpen {
            path: path.to_owned(),
        });
    }

    fn close_nowrite(&self, path: &Path) {
        self.bus.publish(SyncEvent::FileCloseNoWrite {
            path: path.to_owned(),
        });
    }

    fn close_write(&self, path: &Path) {
        self.bus.publish(SyncEvent::FileCloseWrite {
            path: path.to_owned(),
        });
    }

    fn commit(&self, node_id: &str) -> TransferHandle {
        let handle = TransferHandle::new("", node_id, "s_hash");
        self.bus
            .publish(SyncEvent::DownloadCommit(handle.clone()));
        handle
    }

    fn hash_completed(&self, path: &Path) {
        self.bus.publish(SyncEvent::HashCompleted {
            path: path.to_owned(),
            digest: Default::default(),
        });
    }

    fn finished_events(&self) -> Vec<TransferHandle> {
        self.recorder
            .take()
            .into_iter()
            .filter_map(|event| match event {
                SyncEvent::DownloadFinished(handle)
                | SyncEvent::UploadFinished(handle) => Some(handle),
                _ => None,
            })
            .collect()
    }
}

#[test]
fn forwards_when_path_is_quiescent() {
    let h = Harness::download();
    h.node("nodeid", "/u/testfile");

    let handle = h.commit("nodeid");

    // The finished event fires within the same dispatch, right after the
    // commit is observed by other listeners.
    assert_eq!(
        h.recorder.take(),
        vec![
            SyncEvent::DownloadCommit(handle.clone()),
            SyncEvent::DownloadFinished(handle),
        ]
    );
    assert!(!h.tracker.is_tracked(Path::new("/u/testfile")));
}

#[test]
fn blocks_while_open() {
    let h = Harness::download();
    let path = h.node("nodeid", "/u/testfile");

    h.open(&path);
    let handle = h.commit("nodeid");

    assert_eq!(
        h.recorder.take(),
        vec![
            SyncEvent::FileOpen { path: path.clone() },
            SyncEvent::DownloadCommit(handle),
        ]
    );
    assert!(h.tracker.is_tracked(&path));
    assert_eq!(h.tracker.open_count(&path), 1);
}

#[test]
fn blocks_while_hash_outstanding() {
    let h = Harness::download();
    let path = h.node("nodeid", "/u/testfile");

    h.hash.set_pending(&path);
    let handle = h.commit("nodeid");

    assert_eq!(
        h.recorder.take(),
        vec![SyncEvent::DownloadCommit(handle)]
    );
    assert!(h.tracker.is_tracked(&path));
    assert!(h.tracker.is_awaiting_hash(&path));
}

#[test]
fn releases_on_matching_close() {
    let h = Harness::download();
    let path = h.node("nodeid", "/u/testfile");

    h.open(&path);
    let handle = h.commit("nodeid");
    h.recorder.take();

    h.close_nowrite(&path);

    assert_eq!(
        h.recorder.take(),
        vec![
            SyncEvent::FileCloseNoWrite { path: path.clone() },
            SyncEvent::DownloadFinished(handle),
        ]
    );
    assert!(!h.tracker.is_tracked(&path));
    assert_eq!(h.tracker.open_count(&path), 0);
}

#[test]
fn close_write_demands_a_hash() {
    let h = Harness::download();
    let path = h.node("nodeid", "/u/testfile");

    h.open(&path);
    let handle = h.commit("nodeid");
    h.recorder.take();

    // Close-with-write clears the open count but the content changed under
    // us: the record must now wait for hash confirmation.
    h.close_write(&path);
    assert!(h.finished_events().is_empty());
    assert!(h.tracker.is_tracked(&path));
    assert_eq!(h.tracker.open_count(&path), 0);
    assert!(h.tracker.is_awaiting_hash(&path));

    // Open/close cycles on the unverified content change nothing.
    h.open(&path);
    h.close_nowrite(&path);
    assert!(h.finished_events().is_empty());
    assert!(h.tracker.is_tracked(&path));

    h.hash_completed(&path);
    assert_eq!(h.finished_events(), vec![handle]);
    assert!(!h.tracker.is_tracked(&path));
    assert!(!h.tracker.is_awaiting_hash(&path));
}

#[test]
fn double_open_needs_both_closes() {
    let h = Harness::download();
    let path = h.node("nodeid", "/u/testfile");

    h.open(&path);
    let handle = h.commit("nodeid");
    h.open(&path);
    assert_eq!(h.tracker.open_count(&path), 2);
    h.recorder.take();

    h.close_nowrite(&path);
    assert!(h.finished_events().is_empty());
    assert_eq!(h.tracker.open_count(&path), 1);

    h.close_nowrite(&path);
    assert_eq!(h.finished_events(), vec![handle]);
    assert!(!h.tracker.is_tracked(&path));
}

#[test]
fn unmatched_close_never_underflows_or_double_fires() {
    let h = Harness::download();
    let path = h.node("nodeid", "/u/testfile");

    h.open(&path);
    let handle = h.commit("nodeid");
    h.recorder.take();

    h.close_nowrite(&path);
    assert_eq!(h.finished_events(), vec![handle]);

    // Stray closes after release: no negative counts, no second finished.
    h.close_nowrite(&path);
    h.close_nowrite(&path);
    assert!(h.finished_events().is_empty());
    assert_eq!(h.tracker.open_count(&path), 0);
}

#[test]
fn close_of_other_path_does_not_release() {
    let h = Harness::download();
    let path = h.node("nodeid", "/u/testfile");

    h.open(&path);
    let handle = h.commit("nodeid");
    h.recorder.take();

    h.close_nowrite(Path::new("/u/other"));
    assert!(h.finished_events().is_empty());
    assert!(h.tracker.is_tracked(&path));

    h.close_nowrite(&path);
    assert_eq!(h.finished_events(), vec![handle]);
}

#[test]
fn create_discards_without_firing() {
    let h = Harness::download();
    let path = h.node("nodeid", "/u/testfile");

    h.open(&path);
    h.commit("nodeid");
    h.recorder.take();

    h.bus.publish(SyncEvent::FileCreate { path: path.clone() });
    assert!(h.finished_events().is_empty());
    assert!(!h.tracker.is_tracked(&path));
    assert_eq!(h.tracker.open_count(&path), 0);

    // A close for the discarded obligation stays silent.
    h.close_nowrite(&path);
    assert!(h.finished_events().is_empty());
}

#[test]
fn delete_discards_without_firing() {
    let h = Harness::download();
    let path = h.node("nodeid", "/u/testfile");

    h.open(&path);
    h.commit("nodeid");
    h.recorder.take();

    h.bus.publish(SyncEvent::FileDelete { path: path.clone() });
    assert!(h.finished_events().is_empty());
    assert!(!h.tracker.is_tracked(&path));
}

#[test]
fn create_and_delete_with_nothing_tracked_are_noops() {
    let h = Harness::download();
    let path = PathBuf::from("/u/testfile");

    h.bus.publish(SyncEvent::FileCreate { path: path.clone() });
    h.bus.publish(SyncEvent::FileDelete { path: path.clone() });

    assert_eq!(
        h.recorder.take(),
        vec![
            SyncEvent::FileCreate { path: path.clone() },
            SyncEvent::FileDelete { path },
        ]
    );
}

#[test]
fn file_move_reroutes_the_obligation() {
    let h = Harness::download();
    let path = h.node("nodeid", "/u/testfile");
    let moved = PathBuf::from("/u/testfile2");

    h.open(&path);
    let handle = h.commit("nodeid");
    h.recorder.take();

    h.bus.publish(SyncEvent::FileMove {
        path_from: path.clone(),
        path_to: moved.clone(),
    });
    assert!(!h.tracker.is_tracked(&path));
    assert!(h.tracker.is_tracked(&moved));
    assert_eq!(h.tracker.open_count(&moved), 1);

    // The close that would have released the old path releases the new one.
    h.close_nowrite(&moved);
    assert_eq!(h.finished_events(), vec![handle]);
    assert!(!h.tracker.is_tracked(&moved));
}

#[test]
fn dir_move_matches_whole_components_only() {
    let h = Harness::download();

    // Tricky sibling names around the moved directory `fo12`.
    let paths: Vec<PathBuf> = [
        "/u/fo123/tfile",
        "/u/fo12/tfile",
        "/u/fo1/tfile",
        "/u/fo",
        "/u/fo1234",
    ]
    .iter()
    .enumerate()
    .map(|(i, p)| {
        let path = h.node(&format!("nodeid{}", i + 1), p);
        h.open(&path);
        h.bus.publish(SyncEvent::DownloadCommit(TransferHandle::new(
            "",
            format!("nodeid{}", i + 1).as_str(),
            "s_hash",
        )));
        path
    })
    .collect();
    h.recorder.take();

    h.bus.publish(SyncEvent::DirMove {
        path_from: PathBuf::from("/u/fo12"),
        path_to: PathBuf::from("/u/zar"),
    });

    let rewritten = PathBuf::from("/u/zar/tfile");
    assert!(h.tracker.is_tracked(&paths[0]));
    assert!(!h.tracker.is_tracked(&paths[1]));
    assert!(h.tracker.is_tracked(&rewritten));
    assert!(h.tracker.is_tracked(&paths[2]));
    assert!(h.tracker.is_tracked(&paths[3]));
    assert!(h.tracker.is_tracked(&paths[4]));

    h.close_nowrite(&rewritten);
    assert_eq!(
        h.finished_events(),
        vec![TransferHandle::new("", "nodeid2", "s_hash")]
    );
    assert!(!h.tracker.is_tracked(&rewritten));
    assert!(h.tracker.is_tracked(&paths[0]));
}

#[test]
fn complex_interleaving_of_moves_and_opens() {
    let h = Harness::download();
    let tf1 = h.node("nodeid", "/u/foo/tfile1");
    let tf2 = PathBuf::from("/u/foo/tfile2");
    let moved_tf2 = PathBuf::from("/u/zar/tfile2");

    h.open(&tf1);
    let handle = h.commit("nodeid");
    h.open(&tf1);
    assert_eq!(h.tracker.open_count(&tf1), 2);
    h.recorder.take();

    h.close_nowrite(&tf1);
    assert_eq!(h.tracker.open_count(&tf1), 1);
    assert!(h.tracker.is_tracked(&tf1));

    h.bus.publish(SyncEvent::FileMove {
        path_from: tf1.clone(),
        path_to: tf2.clone(),
    });
    assert!(!h.tracker.is_tracked(&tf1));
    assert!(h.tracker.is_tracked(&tf2));
    assert_eq!(h.tracker.open_count(&tf2), 1);

    h.open(&tf2);
    h.bus.publish(SyncEvent::DirMove {
        path_from: PathBuf::from("/u/foo"),
        path_to: PathBuf::from("/u/zar"),
    });
    assert!(!h.tracker.is_tracked(&tf2));
    assert!(h.tracker.is_tracked(&moved_tf2));
    assert_eq!(h.tracker.open_count(&moved_tf2), 2);

    h.close_nowrite(&moved_tf2);
    h.close_nowrite(&moved_tf2);
    assert_eq!(h.finished_events(), vec![handle]);
    assert!(!h.tracker.is_tracked(&moved_tf2));
    assert_eq!(h.tracker.open_count(&moved_tf2), 0);
}

#[test]
fn hash_settles_but_still_open() {
    let h = Harness::download();
    let path = h.node("nodeid", "/u/testfile");

    h.hash.set_pending(&path);
    let handle = h.commit("nodeid");
    assert!(h.tracker.is_tracked(&path));

    h.open(&path);
    h.hash.clear_pending(&path);
    h.hash_completed(&path);
    assert!(h.finished_events().is_empty());
    assert!(h.tracker.is_tracked(&path));

    h.close_nowrite(&path);
    assert_eq!(h.finished_events(), vec![handle]);
}

#[test]
fn closes_settle_but_still_hashing() {
    let h = Harness::download();
    let path = h.node("nodeid", "/u/testfile");

    h.open(&path);
    let handle = h.commit("nodeid");
    h.recorder.take();

    // The worker picked the path up before the close arrived.
    h.hash.set_pending(&path);
    h.close_nowrite(&path);
    assert!(h.finished_events().is_empty());
    assert!(h.tracker.is_tracked(&path));
    assert!(h.tracker.is_awaiting_hash(&path));

    h.hash.clear_pending(&path);
    h.hash_completed(&path);
    assert_eq!(h.finished_events(), vec![handle]);
    assert!(!h.tracker.is_tracked(&path));
}

#[test]
fn hash_error_stops_blocking_on_the_hash_axis() {
    let h = Harness::download();
    let path = h.node("nodeid", "/u/testfile");

    h.open(&path);
    let handle = h.commit("nodeid");
    h.close_write(&path);
    assert!(h.tracker.is_awaiting_hash(&path));
    h.recorder.take();

    h.bus.publish(SyncEvent::HashError {
        path: path.clone(),
        error: "file vanished".into(),
    });
    assert_eq!(h.finished_events(), vec![handle]);
    assert!(!h.tracker.is_tracked(&path));
}

#[test]
fn unresolvable_commit_is_dropped() {
    let h = Harness::download();

    let handle = TransferHandle::new("", "ghost", "s_hash");
    h.bus.publish(SyncEvent::DownloadCommit(handle.clone()));

    // No finished event, no record, and the commit itself still reached
    // every listener.
    assert_eq!(h.recorder.take(), vec![SyncEvent::DownloadCommit(handle)]);
}

#[test]
fn recommit_replays_the_latest_payload() {
    let h = Harness::download();
    let path = h.node("nodeid", "/u/testfile");

    h.open(&path);
    h.bus.publish(SyncEvent::DownloadCommit(TransferHandle::new(
        "", "nodeid", "hash-1",
    )));
    h.bus.publish(SyncEvent::DownloadCommit(TransferHandle::new(
        "", "nodeid", "hash-2",
    )));
    h.recorder.take();

    h.close_nowrite(&path);
    assert_eq!(
        h.finished_events(),
        vec![TransferHandle::new("", "nodeid", "hash-2")]
    );
}

#[test]
fn upload_direction_mirrors_download() {
    let h = Harness::new(Direction::Upload);
    let path = h.node("nodeid", "/u/outgoing");

    h.open(&path);
    let handle = TransferHandle::new("", "nodeid", "s_hash");
    h.bus.publish(SyncEvent::UploadCommit(handle.clone()));
    assert!(h.tracker.is_tracked(&path));
    h.recorder.take();

    h.close_nowrite(&path);
    assert_eq!(
        h.recorder.take(),
        vec![
            SyncEvent::FileCloseNoWrite { path: path.clone() },
            SyncEvent::UploadFinished(handle),
        ]
    );
}

#[test]
fn trackers_ignore_the_other_direction() {
    let h = Harness::download();
    let path = h.node("nodeid", "/u/testfile");

    h.open(&path);
    h.bus.publish(SyncEvent::UploadCommit(TransferHandle::new(
        "", "nodeid", "s_hash",
    )));

    assert!(!h.tracker.is_tracked(&path));
    assert!(h.finished_events().is_empty());
}
