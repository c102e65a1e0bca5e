// Queue entry ID generator
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use super::NodeId;

/// Snowflake-style generator for queue entry identifiers
///
/// Queue entries are ordered solely by their ID, so IDs must be unique across
/// every orchestrator process writing to the shared queue table and must sort
/// in creation order.
///
/// Format (64 bits):
/// - 41 bits: timestamp in milliseconds since custom epoch
/// - 10 bits: worker ID, derived from the local node address
/// - 12 bits: sequence number within one millisecond
pub struct QueueIdGenerator {
    /// Worker ID (0-1023)
    worker_id: u16,

    /// Custom epoch (milliseconds since Unix epoch)
    epoch: u64,

    /// State protected by mutex
    state: Mutex<GeneratorState>,
}

struct GeneratorState {
    /// Last timestamp used
    last_timestamp: u64,

    /// Sequence number (0-4095)
    sequence: u16,
}

impl QueueIdGenerator {
    /// Custom epoch: 2024-01-01 00:00:00 UTC
    pub const DEFAULT_EPOCH: u64 = 1704067200000;

    /// Maximum worker ID
    pub const MAX_WORKER_ID: u16 = 1023;

    /// Maximum sequence number
    const MAX_SEQUENCE: u16 = 4095;

    /// Create a generator whose worker ID is derived from the local node
    /// address, so orchestrators on different nodes never collide.
    pub fn for_node(node: &NodeId) -> Self {
        Self::new(Self::worker_id_for_node(node))
    }

    /// Create a generator with an explicit worker ID.
    pub fn new(worker_id: u16) -> Self {
        Self::with_epoch(worker_id, Self::DEFAULT_EPOCH)
    }

    /// Create a generator with an explicit worker ID and custom epoch.
    pub fn with_epoch(worker_id: u16, epoch: u64) -> Self {
        assert!(
            worker_id <= Self::MAX_WORKER_ID,
            "worker_id must be <= {}",
            Self::MAX_WORKER_ID
        );

        Self {
            worker_id,
            epoch,
            state: Mutex::new(GeneratorState {
                last_timestamp: 0,
                sequence: 0,
            }),
        }
    }

    /// Derive a worker ID from a node address (low 10 bits of SHA-256).
    pub fn worker_id_for_node(node: &NodeId) -> u16 {
        let digest = Sha256::digest(node.as_str().as_bytes());
        let tail = u16::from_be_bytes([digest[30], digest[31]]);
        tail & Self::MAX_WORKER_ID
    }

    /// Generate the next queue entry ID
    pub fn next_id(&self) -> Result<i64, String> {
        let mut state = self.state.lock().unwrap();

        let mut timestamp = self.current_timestamp()?;

        // Handle clock going backwards
        if timestamp < state.last_timestamp {
            return Err(format!(
                "Clock moved backwards. Refusing to generate id for {} milliseconds",
                state.last_timestamp - timestamp
            ));
        }

        if timestamp == state.last_timestamp {
            // Same millisecond - increment sequence
            state.sequence = (state.sequence + 1) & Self::MAX_SEQUENCE;

            if state.sequence == 0 {
                // Sequence overflow - wait for next millisecond
                timestamp = self.wait_next_millis(state.last_timestamp)?;
            }
        } else {
            // New millisecond - reset sequence
            state.sequence = 0;
        }

        state.last_timestamp = timestamp;

        let id = ((timestamp - self.epoch) << 22)
            | ((self.worker_id as u64) << 12)
            | (state.sequence as u64);

        Ok(id as i64)
    }

    /// Get current timestamp in milliseconds
    fn current_timestamp(&self) -> Result<u64, String> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .map_err(|e| format!("Failed to get current timestamp: {}", e))
    }

    /// Wait until next millisecond
    fn wait_next_millis(&self, last_timestamp: u64) -> Result<u64, String> {
        let mut timestamp = self.current_timestamp()?;
        while timestamp <= last_timestamp {
            timestamp = self.current_timestamp()?;
        }
        Ok(timestamp)
    }

    /// Extract the creation timestamp from a queue entry ID
    pub fn extract_timestamp(&self, id: i64) -> u64 {
        let id = id as u64;
        (id >> 22) + self.epoch
    }

    /// Extract the worker ID from a queue entry ID
    pub fn extract_worker_id(&self, id: i64) -> u16 {
        let id = id as u64;
        ((id >> 12) & 0x3FF) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generation() {
        let gen = QueueIdGenerator::new(1);
        let id = gen.next_id().unwrap();
        assert!(id > 0);
    }

    #[test]
    fn test_uniqueness() {
        let gen = QueueIdGenerator::new(1);
        let mut ids = HashSet::new();

        for _ in 0..10000 {
            let id = gen.next_id().unwrap();
            assert!(ids.insert(id), "Duplicate ID generated: {}", id);
        }
    }

    #[test]
    fn test_strictly_increasing() {
        let gen = QueueIdGenerator::new(1);
        let mut last_id = 0i64;

        for _ in 0..1000 {
            let id = gen.next_id().unwrap();
            assert!(id > last_id, "IDs not in order: {} <= {}", id, last_id);
            last_id = id;
        }
    }

    #[test]
    fn test_extract_timestamp() {
        let gen = QueueIdGenerator::new(1);
        let id = gen.next_id().unwrap();
        let timestamp = gen.extract_timestamp(id);

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;

        // Timestamp should be within 1 second of now
        assert!((timestamp as i64 - now as i64).abs() < 1000);
    }

    #[test]
    fn test_worker_id_from_node_is_stable() {
        let node = NodeId::new("10.0.0.2:9312");
        let a = QueueIdGenerator::worker_id_for_node(&node);
        let b = QueueIdGenerator::worker_id_for_node(&node);
        assert_eq!(a, b);
        assert!(a <= QueueIdGenerator::MAX_WORKER_ID);
    }

    #[test]
    fn test_distinct_nodes_do_not_collide() {
        let gen_a = QueueIdGenerator::for_node(&NodeId::new("10.0.0.1:9312"));
        let gen_b = QueueIdGenerator::for_node(&NodeId::new("10.0.0.2:9312"));
        assert_ne!(gen_a.worker_id, gen_b.worker_id);

        let mut ids = HashSet::new();
        for _ in 0..2000 {
            assert!(ids.insert(gen_a.next_id().unwrap()));
            assert!(ids.insert(gen_b.next_id().unwrap()));
        }
    }

    #[test]
    fn test_extract_worker_id() {
        let gen = QueueIdGenerator::new(42);
        let id = gen.next_id().unwrap();
        assert_eq!(gen.extract_worker_id(id), 42);
    }

    #[test]
    #[should_panic(expected = "worker_id must be")]
    fn test_invalid_worker_id() {
        QueueIdGenerator::new(2000);
    }
}
