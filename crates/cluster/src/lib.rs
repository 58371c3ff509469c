//! Cluster membership model.
//!
//! A cluster is described by a set of [`Server`] records, each carrying an
//! opaque node ID, a network address, and a [`Suffrage`] tag that says
//! whether the node votes in elections. The [`Servers`] collection keeps
//! the records in canonical order (ascending by ID) and answers the two
//! questions the rest of the system asks of membership: is a node part of
//! the cluster, and is it read-only.

pub mod server;

pub use server::{ParseSuffrageError, Server, Servers, Suffrage};
