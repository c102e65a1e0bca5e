//! # helmsman-commons
//!
//! Shared vocabulary types for the Helmsman sharding orchestrator:
//! - `NodeId`: opaque network address identifying a cluster node
//! - `QueueIdGenerator`: time-ordered unique IDs for queue entries
//! - `ShardingConfig`: immutable orchestration configuration
//!
//! These types are deliberately free of engine or orchestration logic so that
//! every other crate can depend on them without cycles.

pub mod config;
pub mod ids;

pub use config::ShardingConfig;
pub use ids::{NodeId, QueueIdGenerator};
