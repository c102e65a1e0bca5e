//! # helmsman-sharding
//!
//! The sharding orchestration core of the Helmsman sidecar. It coordinates
//! schema and membership changes across the nodes of a replicated
//! data-serving cluster through three coupled components:
//!
//! - [`Cluster`]: membership of a named replication group — which nodes
//!   belong, which are currently synced, and which shard attach/detach
//!   operations are pending
//! - [`Queue`]: a durable per-node list of administrative commands with
//!   retry and dependency semantics, drained by an external per-node
//!   dispatch loop
//! - [`State`]: a durable key/value store for orchestration facts (group
//!   identity, membership fingerprint, elected coordinator)
//!
//! Membership changes are expressed as queue commands, queue execution is
//! gated by state, and state mutations are scoped to a cluster's membership;
//! none of the three stands alone.
//!
//! The core holds no threads of its own and talks to the storage engine only
//! through the blocking [`helmsman_link::EngineClient`] seam.

pub mod cluster;
pub mod error;
pub mod queue;
pub mod state;

pub use cluster::{Cluster, TableOperation};
pub use error::{Result, ShardingError};
pub use queue::{Queue, QueueEntry, QueueStatus};
pub use state::{State, StateEntry};
