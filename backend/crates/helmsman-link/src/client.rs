//! Engine client contract.

use std::path::PathBuf;

use crate::error::Result;
use crate::response::Response;

/// Engine-side settings the orchestrator needs to know about.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    /// The engine's on-disk data directory. Group create/join statements
    /// carry an `as path` clause that must exist under this directory before
    /// the statement runs.
    pub data_dir: Option<PathBuf>,
}

/// Blocking request/response client for one storage engine node.
///
/// Statements are passed as literal text and must reach the engine
/// byte-for-byte; the orchestrator applies its own escaping before embedding
/// values. Implementations live in the host daemon — an HTTP client in
/// production, [`crate::test_utils::MockEngine`] in tests.
pub trait EngineClient: Send + Sync {
    /// Issue one request and block for its tabular response.
    ///
    /// A statement the engine rejected is NOT an `Err`: it comes back as a
    /// well-formed [`Response`] whose error field is set. `Err` is reserved
    /// for transport-level failures.
    fn send_request(&self, query: &str) -> Result<Response>;

    /// Whether a table exists on the node.
    fn has_table(&self, table: &str) -> Result<bool>;

    /// Engine-side settings.
    fn settings(&self) -> &EngineSettings;
}
