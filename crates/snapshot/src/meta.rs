//! Snapshot metadata.

use std::time::SystemTime;

use quorum_cluster::Servers;
use serde::{Deserialize, Serialize};

/// Metadata describing a snapshot.
///
/// Produced by the consensus layer and carried through the sink as an
/// opaque serializable record; the sink persists it beside the database
/// image so a generation directory is self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Opaque snapshot ID.
    pub id: String,
    /// Log index the snapshot covers.
    pub index: u64,
    /// Term of the covering index.
    pub term: u64,
    /// Cluster membership at the time of the snapshot.
    pub membership: Servers,
    /// Log index of the membership entry.
    pub membership_index: u64,
    /// When the snapshot was taken.
    pub taken_at: SystemTime,
}

impl SnapshotMeta {
    /// Create metadata for a snapshot taken now.
    pub fn new(id: impl Into<String>, index: u64, term: u64) -> Self {
        SnapshotMeta {
            id: id.into(),
            index,
            term,
            membership: Servers::new(),
            membership_index: 0,
            taken_at: SystemTime::now(),
        }
    }

    /// Attach the cluster membership in force at `membership_index`.
    pub fn with_membership(mut self, membership: Servers, membership_index: u64) -> Self {
        self.membership = membership;
        self.membership_index = membership_index;
        self
    }
}

impl Default for SnapshotMeta {
    fn default() -> Self {
        SnapshotMeta {
            id: String::new(),
            index: 0,
            term: 0,
            membership: Servers::new(),
            membership_index: 0,
            taken_at: SystemTime::UNIX_EPOCH,
        }
    }
}
