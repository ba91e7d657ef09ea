//! Port to the daemon's metadata index.
//!
//! The index maps server-issued node ids to current local paths. It is owned
//! and mutated elsewhere in the daemon; the reconciliation core only reads
//! it, and must tolerate ids that no longer resolve (the node may have been
//! removed by a concurrent operation).

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use parking_lot::Mutex;

use drift_model::{NodeId, ShareId};

pub trait MetadataIndex: Send + Sync {
    /// Current local path for a node, or `None` when the node is unknown.
    fn resolve_path(
        &self,
        share_id: &ShareId,
        node_id: &NodeId,
    ) -> Option<PathBuf>;
}

/// Simple in-memory index, used by the test suites and as the backing store
/// until a node has been persisted.
#[derive(Default)]
pub struct InMemoryMetadataIndex {
    nodes: Mutex<HashMap<(ShareId, NodeId), PathBuf>>,
}

impl InMemoryMetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_node(
        &self,
        share_id: impl Into<ShareId>,
        node_id: impl Into<NodeId>,
        path: impl Into<PathBuf>,
    ) {
        self.nodes
            .lock()
            .insert((share_id.into(), node_id.into()), path.into());
    }

    pub fn remove_node(&self, share_id: &ShareId, node_id: &NodeId) {
        self.nodes
            .lock()
            .remove(&(share_id.clone(), node_id.clone()));
    }
}

impl MetadataIndex for InMemoryMetadataIndex {
    fn resolve_path(
        &self,
        share_id: &ShareId,
        node_id: &NodeId,
    ) -> Option<PathBuf> {
        self.nodes
            .lock()
            .get(&(share_id.clone(), node_id.clone()))
            .cloned()
    }
}

impl fmt::Debug for InMemoryMetadataIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryMetadataIndex")
            .field("node_count", &self.nodes.lock().len())
            .finish()
    }
}
