//! Core data model definitions shared across drift crates.
#![allow(missing_docs)]

pub mod digest;
pub mod event;
pub mod ids;

pub use digest::{FileDigest, StatSnapshot};
pub use event::{EventKind, SyncEvent, TransferHandle};
pub use ids::{NodeId, ShareId};
