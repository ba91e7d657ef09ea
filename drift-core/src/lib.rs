//! Event reconciliation core for the drift sync daemon.
//!
//! The daemon keeps a local directory tree consistent with a remote server.
//! Three independent producers emit information about the same paths: the
//! filesystem watcher, the background hash worker, and the network transfer
//! layer. This crate decides, per path, the exact moment a download or
//! upload may be reported finished:
//!
//! - [`bus::EventBus`] - synchronous in-process pub/sub all components share.
//! - [`hash_worker::HashWorker`] - serialized background digest computation.
//! - [`tracker::TransferTracker`] - per-direction completion tracking; holds
//!   the finished notice until the path has no open handles and no
//!   outstanding hash.
//!
//! The network protocol, persistent metadata store, and platform watcher
//! backends live elsewhere; they meet this crate at [`metadata::MetadataIndex`]
//! and the event model in `drift-model`.
#![allow(missing_docs)]

pub mod bus;
pub mod config;
pub mod error;
pub mod hash_worker;
pub mod hasher;
pub mod metadata;
pub mod paths;
pub mod tracker;

pub use bus::{EventBus, Subscriber};
pub use config::{CoreConfig, HashConfig};
pub use error::{Result, SyncError};
pub use hash_worker::{HashActivity, HashWorker};
pub use hasher::{ContentHasher, Sha256Hasher};
pub use metadata::{InMemoryMetadataIndex, MetadataIndex};
pub use tracker::{Direction, TransferTracker};
