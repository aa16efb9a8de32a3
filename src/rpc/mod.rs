//! RPC surface.
//!
//! [`proto`] holds the hand-written wire messages, [`server`] the tonic
//! services built on them, and [`client`] the unary clients plus the
//! adapters that plug RPC into the replication and discovery loops.

pub mod client;
pub mod proto;
pub mod server;

pub use server::DkvGrpcServer;
