//! Cluster control plane.
//!
//! [`nexus`] is the facade over the embedded consensus module: it owns the
//! member set, leader identity, and the one-at-a-time membership change
//! protocol. [`controller`] wraps it with the external surface (AddNode /
//! RemoveNode / ListNodes) and derives this node's region status from the
//! consensus state.

pub mod controller;
pub mod nexus;

pub use controller::ClusterController;
pub use nexus::{NexusCluster, NexusMember};
