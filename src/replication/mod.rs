//! Master→slave replication pipeline.
//!
//! The master half ([`master`]) tracks registered replicas and serves
//! bounded prefixes of the committed change log. The slave half ([`slave`])
//! is a single background task per shard that tails its chosen master,
//! applies changes in order, and reports its own region status from the
//! observed lag.

pub mod master;
pub mod slave;

pub use master::{ChangeFeed, ReplicaRegistry};
pub use slave::{ChangeBatch, ChangeSource, SlaveLoop, SlaveProgress};
