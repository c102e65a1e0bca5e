//! Tabular response model.
//!
//! Every engine request yields a list of per-statement result blocks. Each
//! block carries its row data as JSON maps plus an optional error string.
//! Failure is signalled through that error field, not through transport
//! errors: a statement that the engine rejected still produces a well-formed
//! response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single result row: column name to JSON cell value.
pub type Row = serde_json::Map<String, Value>;

/// Result of one statement within a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatementResult {
    /// Number of rows matched/affected, when the engine reports it.
    #[serde(default)]
    pub total: Option<u64>,

    /// Error string; `None` or empty means the statement succeeded.
    #[serde(default)]
    pub error: Option<String>,

    /// Result rows (empty for DDL and writes).
    #[serde(default)]
    pub data: Vec<Row>,
}

impl StatementResult {
    /// An empty successful block.
    pub fn ok() -> Self {
        Self::default()
    }

    /// A successful block reporting an affected-row count.
    pub fn affected(total: u64) -> Self {
        Self {
            total: Some(total),
            ..Self::default()
        }
    }

    /// A failed block.
    pub fn with_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// A successful block with row data.
    pub fn with_data(data: Vec<Row>) -> Self {
        Self {
            total: Some(data.len() as u64),
            error: None,
            data,
        }
    }

    /// True when the error field is present and non-empty.
    pub fn has_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}

/// Full response to one request: one block per statement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    pub results: Vec<StatementResult>,
}

impl Response {
    /// A single-block success with no rows.
    pub fn ok() -> Self {
        Self {
            results: vec![StatementResult::ok()],
        }
    }

    /// A single-block failure.
    pub fn with_error(error: impl Into<String>) -> Self {
        Self {
            results: vec![StatementResult::with_error(error)],
        }
    }

    /// A single-block success with row data.
    pub fn with_data(data: Vec<Row>) -> Self {
        Self {
            results: vec![StatementResult::with_data(data)],
        }
    }

    /// A single-block success reporting an affected-row count.
    pub fn affected(total: u64) -> Self {
        Self {
            results: vec![StatementResult::affected(total)],
        }
    }

    /// True when any block reports a non-empty error.
    pub fn has_error(&self) -> bool {
        self.results.iter().any(|r| r.has_error())
    }

    /// First non-empty error string, if any.
    pub fn error(&self) -> Option<&str> {
        self.results
            .iter()
            .find(|r| r.has_error())
            .and_then(|r| r.error.as_deref())
    }

    /// Rows of the first result block.
    pub fn rows(&self) -> &[Row] {
        self.results.first().map(|r| r.data.as_slice()).unwrap_or(&[])
    }

    /// Matched/affected row count of the first block, when reported.
    pub fn total(&self) -> Option<u64> {
        self.results.first().and_then(|r| r.total)
    }

    /// Cell of the first row of the first block, by column name.
    pub fn first_value(&self, column: &str) -> Option<&Value> {
        self.rows().first().and_then(|row| row.get(column))
    }
}
