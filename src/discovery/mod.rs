//! Discovery service and its consumers.
//!
//! [`registry`] is the central soft-state store of region heartbeats.
//! [`heartbeat`] is the node-side loop that reports this node's region.
//! [`client`] is the consumer-side cache over GetClusterInfo, and
//! [`router`] turns its output into per-request target selection.

pub mod client;
pub mod heartbeat;
pub mod registry;
pub mod router;

pub use client::{ClusterInfoFilter, ClusterInfoSource, DiscoveryClient};
pub use heartbeat::{Heartbeater, RegionReporter, StatusSink};
pub use registry::DiscoveryRegistry;
pub use router::ConsistencyLevel;
