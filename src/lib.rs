//! DKV - distributed key-value store with consensus-backed writes and
//! asynchronous change-log replication.
//!
//! DKV is a single-binary node that runs in one of four roles: a master
//! (consensus member serving writes and the replication stream), an
//! asynchronous slave tailing a master's change log, a discovery node
//! tracking per-shard region status across data centers, or a standalone
//! single-member master for development.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Clients                                │
//! │   route per request via discovery: LEADER / PRIMARY_FOLLOWER /  │
//! │            SECONDARY_FOLLOWER / ACTIVE_SLAVE                    │
//! └─────────────────────────────────────────────────────────────────┘
//!                │ gRPC                          │ heartbeats
//! ┌──────────────▼───────────────┐   ┌───────────▼─────────────────┐
//! │          Master              │   │        Discovery            │
//! │  KV engine + change log      │   │  region registry (soft      │
//! │  replica registry            │   │  state, heartbeat TTL)      │
//! │  cluster controller (Nexus)  │   └───────────▲─────────────────┘
//! └──────────────┬───────────────┘               │
//!                │ GetChanges                    │
//! ┌──────────────▼───────────────┐               │
//! │          Slave               │───────────────┘
//! │  puller loop + idempotent    │
//! │  apply + persisted mark      │
//! └──────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Role-driven component lifecycle
//! - [`core::error`] - Error taxonomy and status mapping
//! - [`core::time`] - Wall-clock sampling for TTL and heartbeats
//!
//! ## Storage
//! - [`storage`] - Engine traits, write batches, backend selection
//! - [`storage::durable`] - WAL-backed durable backend
//! - [`storage::memory`] - In-memory backend
//! - [`storage::wal`] - Segmented change-record log
//!
//! ## Replication
//! - [`replication::master`] - Replica registry and change feed
//! - [`replication::slave`] - Puller loop and persisted high-water mark
//!
//! ## Cluster
//! - [`cluster::nexus`] - Embedded consensus facade
//! - [`cluster::controller`] - Membership surface and role derivation
//!
//! ## Discovery
//! - [`discovery::registry`] - Central region registry
//! - [`discovery::heartbeat`] - Node-side heartbeat loop
//! - [`discovery::client`] - Consumer-side cached lookups
//! - [`discovery::router`] - Consistency-driven target selection
//!
//! ## RPC
//! - [`rpc::proto`] - Hand-written wire messages
//! - [`rpc::server`] - tonic services
//! - [`rpc::client`] - Unary clients and loop adapters
//!
//! # Key Invariants
//!
//! - Change numbers are strictly monotonic and dense per shard; read-only
//!   operations never advance them.
//! - A change record applies atomically or not at all, on masters and
//!   slaves alike.
//! - Slaves apply strictly contiguous ranges; duplicate delivery is
//!   rejected, which is what makes at-least-once delivery idempotent.
//! - Discovery timestamps are monotonic per region; stale heartbeats are
//!   dropped silently.

// Core infrastructure
pub mod core;

// Storage layer
pub mod storage;

// Replication pipeline
pub mod replication;

// Cluster control plane
pub mod cluster;

// Discovery service and consumers
pub mod discovery;

// RPC surface
pub mod rpc;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, runtime, time};
pub use cluster::{controller, nexus};
pub use discovery::{client as discovery_client, heartbeat, registry, router};
pub use replication::{master, slave};
pub use rpc::{client as rpc_client, proto, server};
pub use storage::{durable, memory, wal};
