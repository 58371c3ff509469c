//! Snapshot pipeline: point-in-time database images for log
//! compaction and new-follower bootstrap.
//!
//! - `provider`: [`Provider`], a retry-resilient byte-stream source
//!   over anything that implements [`BackupSource`]
//! - `sink`: [`Sink`], which receives an image into a working
//!   directory and atomically promotes it across generation
//!   directories
//! - `meta`: [`SnapshotMeta`], the metadata persisted beside each
//!   installed image
//!
//! The provider side runs on the node taking the snapshot; the sink
//! side runs on the node installing one. Between them sits whatever
//! transport the consensus layer uses.

#![warn(missing_docs)]

pub mod error;
pub mod meta;
pub mod provider;
pub mod sink;

pub use error::{Result, SnapshotError};
pub use meta::SnapshotMeta;
pub use provider::{BackupSource, Provider, ProviderConfig};
pub use sink::{CommitPolicy, Sink, GENERATION_DB_FILE, GENERATION_META_FILE};
