//! Durable orchestration state.
//!
//! A small key/value store over the shared engine storage, holding the
//! orchestration facts every node can read and update independently: the
//! current group name, the membership fingerprint and the elected
//! coordinator. Values are JSON, wrapped in a single-element array on write
//! so the column keeps one uniform shape.
//!
//! Reads go to the local table; writes are cluster-scoped (when a cluster is
//! associated) so they replicate to every member.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use chrono::Utc;

use helmsman_link::{escape_value, EngineClient};

use crate::cluster::Cluster;
use crate::error::{Result, ShardingError};

/// Keys every bootstrapped deployment carries, with their defaults:
/// the group name, the membership fingerprint and the coordinator node.
pub const STATE_DEFAULTS: [(&str, &str); 3] =
    [("cluster", ""), ("cluster_hash", ""), ("master", "")];

/// One key/value fact, as returned by [`State::list_regex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub key: String,
    pub value: Value,
}

/// Durable key/value store for orchestration facts.
pub struct State {
    client: Arc<dyn EngineClient>,
    table: String,

    /// Optional cluster association; only used to scope the write location.
    cluster: Mutex<Option<Arc<Cluster>>>,
}

impl State {
    pub fn new(client: Arc<dyn EngineClient>) -> Self {
        Self {
            client,
            table: "system.sharding_state".to_string(),
            cluster: Mutex::new(None),
        }
    }

    /// Name of the backing table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Associate a cluster so writes target the cluster-scoped table.
    /// State works without one in single-node mode.
    pub fn set_cluster(&self, cluster: Arc<Cluster>) -> &Self {
        *self.cluster.lock() = Some(cluster);
        self
    }

    /// Set a key. A null value is rejected before any write: absence is
    /// expressed by key non-existence, never by a stored null. Engine write
    /// failures are logged and swallowed — orchestration re-attempts later.
    pub fn set(&self, key: &str, value: &Value) -> Result<&Self> {
        if value.is_null() {
            return Err(ShardingError::InvalidArgument(
                "state value cannot be null".to_string(),
            ));
        }

        let table = self.write_table_name();
        let now = Utc::now().timestamp();
        let encoded = escape_value(&value.to_string());

        let statement = match self.fetch(key)? {
            None => format!(
                "INSERT INTO {table} (`key`, `value`, `updated_at`) \
                 VALUES ('{key}', '[{encoded}]', {now})",
            ),
            Some(_) => format!(
                "UPDATE {table} SET `updated_at` = {now}, `value` = '[{encoded}]' \
                 WHERE `key` = '{key}'",
            ),
        };

        match self.client.send_request(&statement) {
            Ok(response) if response.has_error() => log::debug!(
                "error while setting state key '{}': {}",
                key,
                response.error().unwrap_or_default()
            ),
            Ok(_) => {}
            Err(error) => log::debug!("error while setting state key '{}': {}", key, error),
        }

        Ok(self)
    }

    /// Get a key's value, falling back to the compile-time default for the
    /// well-known keys and `Null` for everything else.
    pub fn get(&self, key: &str) -> Result<Value> {
        if let Some(value) = self.fetch(key)? {
            return Ok(value);
        }
        Ok(STATE_DEFAULTS
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, default)| Value::String((*default).to_string()))
            .unwrap_or(Value::Null))
    }

    /// Every key/value pair whose key matches the given pattern. Ordering is
    /// whatever the engine returns.
    pub fn list_regex(&self, pattern: &str) -> Result<Vec<StateEntry>> {
        let statement = format!(
            "SELECT `key`, value[0] AS value FROM {} WHERE REGEX(`key`, '{}')",
            self.table,
            escape_value(pattern),
        );
        let response = self.client.send_request(&statement)?;
        Ok(response
            .rows()
            .iter()
            .filter_map(|row| {
                let key = row.get("key")?.as_str()?.to_string();
                let value = normalize_value(row.get("value")?)?;
                Some(StateEntry { key, value })
            })
            .collect())
    }

    /// Create the backing table and attach it to the associated cluster.
    pub fn setup(&self) -> Result<()> {
        if self.client.has_table(&self.table)? {
            return Err(ShardingError::AlreadyInitialized(self.table.clone()));
        }
        let statement = format!(
            "CREATE TABLE {} (`key` string, `value` json, `updated_at` timestamp)",
            self.table,
        );
        let response = self.client.send_request(&statement)?;
        if response.has_error() {
            return Err(ShardingError::Engine(
                response.error().unwrap_or_default().to_string(),
            ));
        }
        if let Some(cluster) = self.cluster.lock().clone() {
            cluster.attach_tables(&[self.table.as_str()])?;
        }
        Ok(())
    }

    /// Whether orchestration has been fully bootstrapped: the table exists
    /// and every well-known key holds a stored value. Mere provisioning is
    /// not enough.
    pub fn is_active(&self) -> Result<bool> {
        if !self.client.has_table(&self.table)? {
            return Ok(false);
        }
        for (key, _) in STATE_DEFAULTS {
            if self.fetch(key)?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Fetch a key's stored value, normalized.
    fn fetch(&self, key: &str) -> Result<Option<Value>> {
        let statement = format!(
            "SELECT value[0] as value FROM {} WHERE key = '{}'",
            self.table, key,
        );
        let response = self.client.send_request(&statement)?;
        match response.first_value("value") {
            Some(cell) => Ok(normalize_value(cell)),
            None => Ok(None),
        }
    }

    fn write_table_name(&self) -> String {
        match self.cluster.lock().as_ref() {
            Some(cluster) => cluster.system_table_name(&self.table),
            None => self.table.clone(),
        }
    }
}

/// Normalize a `value[0]` cell: the engine hands plain strings back
/// unquoted, so a non-brace-delimited string is the value itself; anything
/// else is JSON text to decode. An undecodable cell reads as absent.
fn normalize_value(cell: &Value) -> Option<Value> {
    match cell {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            if !trimmed.starts_with('{') && !trimmed.ends_with('}') {
                return Some(Value::String(trimmed.to_string()));
            }
            serde_json::from_str(trimmed).ok()
        }
        other => Some(other.clone()),
    }
}
