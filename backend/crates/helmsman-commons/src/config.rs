//! Orchestrator configuration types
//!
//! Configuration for the sharding orchestrator, parsed from the `[sharding]`
//! section of the host daemon's config file. The section has a FLAT structure
//! (no nesting), so this type reflects that flat structure for proper TOML
//! deserialization.
//!
//! The orchestrator never reads process environment state; everything it
//! needs arrives through this struct.

use serde::{Deserialize, Serialize};

use crate::ids::NodeId;

/// Complete orchestrator configuration (FLAT structure)
///
/// Example config section:
/// ```toml
/// [sharding]
/// node = "127.0.0.1:9312"
/// cluster = "c1"
/// queue_max_tries = 10
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShardingConfig {
    /// Network address of the local node. This is the authoritative identity
    /// used as the join target and as the default queue target.
    pub node: String,

    /// Name of the replication group this node belongs to.
    /// An empty string means single-node mode: no fan-out, no table prefixes.
    #[serde(default)]
    pub cluster: String,

    /// Retry budget for queued commands (default: 10). An entry whose tries
    /// reach this cap is never dequeued again.
    #[serde(default = "default_queue_max_tries")]
    pub queue_max_tries: u32,
}

fn default_queue_max_tries() -> u32 {
    10
}

impl ShardingConfig {
    /// Check if this configuration is valid
    pub fn validate(&self) -> Result<(), String> {
        if self.node.is_empty() {
            return Err("node address cannot be empty".to_string());
        }

        if self.queue_max_tries == 0 {
            return Err("queue_max_tries must be > 0".to_string());
        }

        Ok(())
    }

    /// The local node's identity.
    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.node.clone())
    }

    /// True when no replication group is configured.
    pub fn is_single_node(&self) -> bool {
        self.cluster.is_empty()
    }
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            node: String::new(),
            cluster: String::new(),
            queue_max_tries: default_queue_max_tries(),
        }
    }
}
