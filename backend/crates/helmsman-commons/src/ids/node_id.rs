//! Node identifier type for replication groups
//!
//! Each node of a replication group is addressed by its network address
//! (e.g., "10.0.0.2:9312"). The address is the node's identity: membership
//! sets, queue entry targets and the persisted coordinator key all use it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error returned when a node address fails validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdValidationError {
    pub address: String,
    pub reason: String,
}

impl fmt::Display for NodeIdValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid node address '{}': {}", self.address, self.reason)
    }
}

impl std::error::Error for NodeIdValidationError {}

/// Node identifier: an opaque network address.
///
/// The address is embedded verbatim into administrative statements, so it is
/// validated to be non-empty and free of quotes and whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node ID without validation.
    ///
    /// Use [`NodeId::parse`] for addresses coming from the outside world.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Validate and create a node ID.
    pub fn parse(address: impl Into<String>) -> Result<Self, NodeIdValidationError> {
        let address = address.into();
        if address.is_empty() {
            return Err(NodeIdValidationError {
                address,
                reason: "address cannot be empty".to_string(),
            });
        }
        if address.chars().any(|c| c.is_whitespace()) {
            return Err(NodeIdValidationError {
                address,
                reason: "address cannot contain whitespace".to_string(),
            });
        }
        if address.contains('\'') || address.contains('\\') {
            return Err(NodeIdValidationError {
                address,
                reason: "address cannot contain quotes or backslashes".to_string(),
            });
        }
        Ok(Self(address))
    }

    /// Get the address as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(address: &str) -> Self {
        Self(address.to_string())
    }
}

impl From<String> for NodeId {
    fn from(address: String) -> Self {
        Self(address)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_creation() {
        let node = NodeId::new("127.0.0.1:9312");
        assert_eq!(node.as_str(), "127.0.0.1:9312");
        assert_eq!(format!("{}", node), "127.0.0.1:9312");
    }

    #[test]
    fn test_node_id_parse_valid() {
        let node = NodeId::parse("10.0.0.2:9312").unwrap();
        assert_eq!(node.as_str(), "10.0.0.2:9312");
    }

    #[test]
    fn test_node_id_parse_empty() {
        let err = NodeId::parse("").unwrap_err();
        assert!(err.reason.contains("empty"));
    }

    #[test]
    fn test_node_id_parse_whitespace() {
        assert!(NodeId::parse("10.0.0.2 :9312").is_err());
    }

    #[test]
    fn test_node_id_parse_quote() {
        assert!(NodeId::parse("10.0.0.2';DROP").is_err());
    }

    #[test]
    fn test_node_id_ordering() {
        let mut nodes = vec![NodeId::new("b:1"), NodeId::new("a:1"), NodeId::new("c:1")];
        nodes.sort();
        assert_eq!(nodes[0].as_str(), "a:1");
        assert_eq!(nodes[2].as_str(), "c:1");
    }
}
