use std::fmt;
use std::path::PathBuf;

use crate::digest::FileDigest;
use crate::ids::{NodeId, ShareId};

/// Payload of a transfer commit, captured when tracking begins and replayed
/// verbatim in the corresponding finished event.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransferHandle {
    pub share_id: ShareId,
    pub node_id: NodeId,
    /// Hash the server expects the local content to settle at.
    pub server_hash: String,
}

impl TransferHandle {
    pub fn new(
        share_id: impl Into<ShareId>,
        node_id: impl Into<NodeId>,
        server_hash: impl Into<String>,
    ) -> Self {
        Self {
            share_id: share_id.into(),
            node_id: node_id.into(),
            server_hash: server_hash.into(),
        }
    }
}

/// Every event that crosses the daemon's in-process bus.
///
/// Producers: the filesystem watcher (`File*`/`DirMove`), the network action
/// queue (`*Commit`), the hash worker (`Hash*`), and the completion trackers
/// (`*Finished`).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SyncEvent {
    FileOpen {
        path: PathBuf,
    },
    FileCloseNoWrite {
        path: PathBuf,
    },
    FileCloseWrite {
        path: PathBuf,
    },
    FileCreate {
        path: PathBuf,
    },
    FileDelete {
        path: PathBuf,
    },
    FileMove {
        path_from: PathBuf,
        path_to: PathBuf,
    },
    DirMove {
        path_from: PathBuf,
        path_to: PathBuf,
    },
    DownloadCommit(TransferHandle),
    DownloadFinished(TransferHandle),
    UploadCommit(TransferHandle),
    UploadFinished(TransferHandle),
    HashCompleted {
        path: PathBuf,
        digest: FileDigest,
    },
    HashError {
        path: PathBuf,
        error: String,
    },
}

impl SyncEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SyncEvent::FileOpen { .. } => EventKind::FileOpen,
            SyncEvent::FileCloseNoWrite { .. } => EventKind::FileCloseNoWrite,
            SyncEvent::FileCloseWrite { .. } => EventKind::FileCloseWrite,
            SyncEvent::FileCreate { .. } => EventKind::FileCreate,
            SyncEvent::FileDelete { .. } => EventKind::FileDelete,
            SyncEvent::FileMove { .. } => EventKind::FileMove,
            SyncEvent::DirMove { .. } => EventKind::DirMove,
            SyncEvent::DownloadCommit(_) => EventKind::DownloadCommit,
            SyncEvent::DownloadFinished(_) => EventKind::DownloadFinished,
            SyncEvent::UploadCommit(_) => EventKind::UploadCommit,
            SyncEvent::UploadFinished(_) => EventKind::UploadFinished,
            SyncEvent::HashCompleted { .. } => EventKind::HashCompleted,
            SyncEvent::HashError { .. } => EventKind::HashError,
        }
    }
}

/// Discriminant of [`SyncEvent`], used for routing and structured logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EventKind {
    FileOpen,
    FileCloseNoWrite,
    FileCloseWrite,
    FileCreate,
    FileDelete,
    FileMove,
    DirMove,
    DownloadCommit,
    DownloadFinished,
    UploadCommit,
    UploadFinished,
    HashCompleted,
    HashError,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::FileOpen => "FS_FILE_OPEN",
            EventKind::FileCloseNoWrite => "FS_FILE_CLOSE_NOWRITE",
            EventKind::FileCloseWrite => "FS_FILE_CLOSE_WRITE",
            EventKind::FileCreate => "FS_FILE_CREATE",
            EventKind::FileDelete => "FS_FILE_DELETE",
            EventKind::FileMove => "FS_FILE_MOVE",
            EventKind::DirMove => "FS_DIR_MOVE",
            EventKind::DownloadCommit => "AQ_DOWNLOAD_COMMIT",
            EventKind::DownloadFinished => "AQ_DOWNLOAD_FINISHED",
            EventKind::UploadCommit => "AQ_UPLOAD_COMMIT",
            EventKind::UploadFinished => "AQ_UPLOAD_FINISHED",
            EventKind::HashCompleted => "HQ_HASH_NEW",
            EventKind::HashError => "HQ_HASH_ERROR",
        };
        f.write_str(name)
    }
}
