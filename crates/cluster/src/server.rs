//! Server records and the membership collection.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Voting status of a server within the cluster.
///
/// Voters take part in leader election and log commitment. Nonvoters
/// receive the replicated log but never vote; a node present in the
/// membership as a Nonvoter is a read-only replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Suffrage {
    /// Full voting member.
    Voter,
    /// Read-only replica; receives the log but does not vote.
    Nonvoter,
}

impl Suffrage {
    /// Whether this suffrage participates in elections.
    pub fn is_voter(&self) -> bool {
        matches!(self, Suffrage::Voter)
    }
}

impl fmt::Display for Suffrage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suffrage::Voter => write!(f, "Voter"),
            Suffrage::Nonvoter => write!(f, "Nonvoter"),
        }
    }
}

/// Error returned when parsing an unrecognized suffrage string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized suffrage: {0}")]
pub struct ParseSuffrageError(pub String);

impl FromStr for Suffrage {
    type Err = ParseSuffrageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Voter" => Ok(Suffrage::Voter),
            "Nonvoter" => Ok(Suffrage::Nonvoter),
            other => Err(ParseSuffrageError(other.to_string())),
        }
    }
}

/// A single member of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// Opaque node ID, unique within the cluster.
    pub id: String,
    /// Network address the node is reachable at.
    pub addr: String,
    /// Voting status.
    pub suffrage: Suffrage,
}

impl Server {
    /// Create a new server record.
    pub fn new(id: impl Into<String>, addr: impl Into<String>, suffrage: Suffrage) -> Self {
        Server {
            id: id.into(),
            addr: addr.into(),
            suffrage,
        }
    }
}

/// An ordered collection of server records.
///
/// IDs are unique within the collection, and the canonical order is
/// ascending by ID. Lookups are linear scans; membership is expected to
/// stay small (at most a few hundred nodes).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Servers(Vec<Server>);

impl Servers {
    /// Create an empty collection.
    pub fn new() -> Self {
        Servers(Vec::new())
    }

    /// Whether a server with the given ID is part of the cluster.
    ///
    /// An empty ID is never contained.
    pub fn contains(&self, id: &str) -> bool {
        !id.is_empty() && self.0.iter().any(|s| s.id == id)
    }

    /// Whether the server with the given ID is a read-only replica.
    ///
    /// Returns `(read_only, found)`. `found` is false if the ID is empty
    /// or absent; `read_only` is true iff the server is found and holds
    /// Nonvoter suffrage.
    pub fn is_read_only(&self, id: &str) -> (bool, bool) {
        if id.is_empty() {
            return (false, false);
        }
        match self.0.iter().find(|s| s.id == id) {
            Some(s) => (s.suffrage == Suffrage::Nonvoter, true),
            None => (false, false),
        }
    }

    /// Sort the collection into canonical order, ascending by ID.
    pub fn canonicalize(&mut self) {
        self.0.sort_by(|a, b| a.id.cmp(&b.id));
    }

    /// Iterate over the server records in their current order.
    pub fn iter(&self) -> std::slice::Iter<'_, Server> {
        self.0.iter()
    }
}

impl From<Vec<Server>> for Servers {
    fn from(servers: Vec<Server>) -> Self {
        Servers(servers)
    }
}

impl FromIterator<Server> for Servers {
    fn from_iter<I: IntoIterator<Item = Server>>(iter: I) -> Self {
        Servers(iter.into_iter().collect())
    }
}

impl Deref for Servers {
    type Target = [Server];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl IntoIterator for Servers {
    type Item = Server;
    type IntoIter = std::vec::IntoIter<Server>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Servers {
    type Item = &'a Server;
    type IntoIter = std::slice::Iter<'a, Server>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
