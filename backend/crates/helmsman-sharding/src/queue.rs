//! Durable per-node command queue.
//!
//! Every administrative command destined for a remote node goes through the
//! queue: an append-only table of entries ordered by a time-derived ID, each
//! addressed to one node. An external per-node dispatch loop calls
//! [`Queue::process`] periodically; entries execute strictly in ID order and
//! a blocked entry halts the whole batch for that node, so later commands
//! never overtake an earlier one.
//!
//! Entries carry a retry budget. A failed command stays eligible for
//! dequeue until its tries reach the cap, after which it is never picked up
//! again. The `status` transition to `processing` is a conditional update
//! judged by its matched-row count; losing that update means another
//! dispatch loop owns the entry.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use chrono::Utc;
use regex::Regex;

use helmsman_commons::{NodeId, QueueIdGenerator, ShardingConfig};
use helmsman_link::{escape_value, EngineClient, Row};

use crate::cluster::Cluster;
use crate::error::{Result, ShardingError};

/// Lifecycle of a queue entry. `error` entries are retried until the retry
/// budget runs out; `processed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Created,
    Processing,
    Processed,
    Error,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Created => "created",
            QueueStatus::Processing => "processing",
            QueueStatus::Processed => "processed",
            QueueStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(QueueStatus::Created),
            "processing" => Some(QueueStatus::Processing),
            "processed" => Some(QueueStatus::Processed),
            "error" => Some(QueueStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One queued administrative command, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: i64,
    pub node: NodeId,
    pub query: String,
    pub wait_for_id: i64,
    pub tries: u32,
    pub status: QueueStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub duration: i64,
}

impl QueueEntry {
    /// Build an entry from a persisted row. Only the ID is mandatory;
    /// anything else missing falls back to its zero value.
    pub fn from_row(row: &Row) -> Option<Self> {
        Some(Self {
            id: row.get("id")?.as_i64()?,
            node: NodeId::new(str_cell(row, "node")),
            query: str_cell(row, "query"),
            wait_for_id: i64_cell(row, "wait_for_id"),
            tries: i64_cell(row, "tries") as u32,
            status: QueueStatus::parse(&str_cell(row, "status")).unwrap_or(QueueStatus::Created),
            created_at: i64_cell(row, "created_at"),
            updated_at: i64_cell(row, "updated_at"),
            duration: i64_cell(row, "duration"),
        })
    }
}

fn str_cell(row: &Row, col: &str) -> String {
    row.get(col)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn i64_cell(row: &Row, col: &str) -> i64 {
    row.get(col).and_then(|v| v.as_i64()).unwrap_or_default()
}

/// Fields of a dequeued entry needed to execute it.
#[derive(Debug, Clone)]
struct PendingCommand {
    id: i64,
    query: String,
    wait_for_id: i64,
    tries: u32,
}

impl PendingCommand {
    fn from_row(row: &Row) -> Option<Self> {
        Some(Self {
            id: row.get("id")?.as_i64()?,
            query: str_cell(row, "query"),
            wait_for_id: i64_cell(row, "wait_for_id"),
            tries: i64_cell(row, "tries") as u32,
        })
    }
}

/// Durable command queue over the shared engine storage.
pub struct Queue {
    cluster: Arc<Cluster>,
    client: Arc<dyn EngineClient>,
    table: String,
    max_tries: u32,
    id_gen: QueueIdGenerator,

    /// Dependency applied to subsequent [`Queue::add`] calls; 0 means none.
    wait_for_id: AtomicI64,
}

impl Queue {
    /// Retry budget for a queued command.
    pub const DEFAULT_MAX_TRIES: u32 = 10;

    pub fn new(cluster: Arc<Cluster>, client: Arc<dyn EngineClient>) -> Self {
        let id_gen = QueueIdGenerator::for_node(cluster.node_id());
        Self {
            cluster,
            client,
            table: "sharding_queue".to_string(),
            max_tries: Self::DEFAULT_MAX_TRIES,
            id_gen,
            wait_for_id: AtomicI64::new(0),
        }
    }

    pub fn from_config(
        cluster: Arc<Cluster>,
        client: Arc<dyn EngineClient>,
        config: &ShardingConfig,
    ) -> Self {
        let mut queue = Self::new(cluster, client);
        queue.max_tries = config.queue_max_tries;
        queue
    }

    /// Name of the backing table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Gate subsequent added entries on the given entry's completion.
    pub fn set_wait_for_id(&self, id: i64) -> &Self {
        self.wait_for_id.store(id, Ordering::SeqCst);
        self
    }

    /// Clear the dependency for subsequent added entries.
    pub fn reset_wait_for_id(&self) -> &Self {
        self.wait_for_id.store(0, Ordering::SeqCst);
        self
    }

    /// Append a command for the given node and return its queue ID.
    pub fn add(&self, node: &NodeId, query: &str) -> Result<i64> {
        let table = self.cluster.system_table_name(&self.table);
        let id = self.id_gen.next_id().map_err(ShardingError::Id)?;
        let now = Utc::now().timestamp_millis();
        let escaped = escape_value(query);
        let wait_for_id = self.wait_for_id.load(Ordering::SeqCst);

        let statement = format!(
            "INSERT INTO {table} \
             (`id`, `node`, `query`, `wait_for_id`, `tries`, `status`, `created_at`, `updated_at`, `duration`) \
             VALUES ({id}, '{node}', '{escaped}', {wait_for_id}, 0, 'created', {now}, {now}, 0)",
        );
        let response = self.client.send_request(&statement)?;
        if response.has_error() {
            return Err(ShardingError::Engine(
                response.error().unwrap_or_default().to_string(),
            ));
        }
        Ok(id)
    }

    /// Fetch a single entry by its ID.
    pub fn get_by_id(&self, id: i64) -> Result<Option<QueueEntry>> {
        let table = self.cluster.system_table_name(&self.table);
        let response = self
            .client
            .send_request(&format!("SELECT * FROM {table} WHERE id = {id} LIMIT 1"))?;
        Ok(response.rows().first().and_then(QueueEntry::from_row))
    }

    /// One dispatch pass for a node: execute its ready entries in ID order,
    /// stopping at the first entry that must be skipped. Skipping preserves
    /// per-node ordering — later entries never run ahead of a blocked one.
    pub fn process(&self, node: &NodeId) -> Result<()> {
        for command in self.dequeue(node)? {
            if self.should_skip(&command)? {
                return Ok(());
            }
            self.handle_command(node, &command);
        }
        Ok(())
    }

    /// Whether a dequeued command must be skipped: either its dependency has
    /// not been processed yet, or the conditional transition to `processing`
    /// was lost to a concurrent dispatch loop.
    fn should_skip(&self, command: &PendingCommand) -> Result<bool> {
        if command.wait_for_id != 0 {
            if let Some(dependency) = self.get_by_id(command.wait_for_id)? {
                if dependency.status != QueueStatus::Processed {
                    log::debug!(
                        "Wait for ID: {} [{}]",
                        command.wait_for_id,
                        dependency.status
                    );
                    return Ok(true);
                }
            }
        }
        Ok(!self.attempt_update_status(command, QueueStatus::Processing, 0))
    }

    /// Execute one command against its node and record the outcome.
    fn handle_command(&self, node: &NodeId, command: &PendingCommand) {
        let started = Instant::now();
        log::debug!("[{}] queue command: {}", node, command.query);

        let error = self.execute_command(&command.query);
        let status = match error {
            None => QueueStatus::Processed,
            Some(_) => QueueStatus::Error,
        };
        log::debug!("[{}] queue command result [{}]", node, status);

        let duration = started.elapsed().as_millis() as i64;
        self.attempt_update_status(command, status, duration);

        if let Some(error) = error {
            log::info!("[{}] queue command error: {} ({})", node, command.query, error);
        }
    }

    /// Run a command, returning its error string if it did not succeed.
    /// Transport failures and engine-reported errors are not distinguished:
    /// either way the command did not succeed and will be retried.
    fn execute_command(&self, query: &str) -> Option<String> {
        self.run_mkdir(query);
        match self.client.send_request(query) {
            Ok(response) => response.error().map(str::to_string),
            Err(error) => Some(error.to_string()),
        }
    }

    /// Entries for the node that are not processed and still under the retry
    /// budget, in ID order.
    fn dequeue(&self, node: &NodeId) -> Result<Vec<PendingCommand>> {
        let table = self.cluster.system_table_name(&self.table);
        let statement = format!(
            "SELECT `id`, `query`, `wait_for_id`, `tries` FROM {table} \
             WHERE `node` = '{node}' AND `status` <> 'processed' AND `tries` < {max_tries} \
             ORDER BY `id` ASC",
            max_tries = self.max_tries,
        );
        let response = self.client.send_request(&statement)?;
        Ok(response
            .rows()
            .iter()
            .filter_map(PendingCommand::from_row)
            .collect())
    }

    fn attempt_update_status(
        &self,
        command: &PendingCommand,
        status: QueueStatus,
        duration: i64,
    ) -> bool {
        if self.update_status(command.id, status, command.tries + 1, duration) {
            return true;
        }
        log::debug!("Failed to update queue status for {}", command.id);
        false
    }

    /// Update an entry's status. The transition to `processing` is
    /// conditional on the entry not being claimed or finished already and is
    /// judged by the matched-row count, so a lost race reads as failure.
    fn update_status(&self, id: i64, status: QueueStatus, tries: u32, duration: i64) -> bool {
        let table = self.cluster.system_table_name(&self.table);
        let now = Utc::now().timestamp_millis();
        let mut statement = format!(
            "UPDATE {table} SET `status` = '{status}', `tries` = {tries}, \
             `updated_at` = {now}, `duration` = {duration} WHERE `id` = {id}",
        );
        if status == QueueStatus::Processing {
            statement.push_str(" AND `status` <> 'processing' AND `status` <> 'processed'");
        }

        let response = match self.client.send_request(&statement) {
            Ok(response) => response,
            Err(error) => {
                log::debug!("queue status update failed for {}: {}", id, error);
                return false;
            }
        };
        if response.has_error() {
            return false;
        }
        if status == QueueStatus::Processing {
            if let Some(matched) = response.total() {
                return matched > 0;
            }
        }
        if status == QueueStatus::Error && tries >= self.max_tries {
            log::warn!(
                "queue entry {} exhausted its retry budget after {} tries",
                id,
                tries
            );
        }
        true
    }

    /// Create the backing table and attach it to the cluster.
    pub fn setup(&self) -> Result<()> {
        if self.client.has_table(&self.table)? {
            return Err(ShardingError::AlreadyInitialized(self.table.clone()));
        }
        let statement = format!(
            "CREATE TABLE `{}` (\
             `node` string, \
             `query` string, \
             `wait_for_id` bigint, \
             `tries` int, \
             `status` string, \
             `created_at` bigint, \
             `updated_at` bigint, \
             `duration` int)",
            self.table,
        );
        let response = self.client.send_request(&statement)?;
        if response.has_error() {
            return Err(ShardingError::Engine(
                response.error().unwrap_or_default().to_string(),
            ));
        }
        self.cluster.attach_tables(&[self.table.as_str()])?;
        Ok(())
    }

    /// Group create/join statements carry an `'<dir>' as path` clause; the
    /// directory must exist under the engine's data dir before the engine
    /// sees the statement. Best-effort: a failure here surfaces later as the
    /// command's own error.
    fn run_mkdir(&self, query: &str) {
        let Some(dir) = extract_cluster_path(query) else {
            return;
        };
        let Some(data_dir) = &self.client.settings().data_dir else {
            return;
        };
        let path = data_dir.join(dir);
        if path.is_dir() {
            return;
        }
        if let Err(error) = std::fs::create_dir_all(&path) {
            log::debug!("failed to create cluster path {}: {}", path.display(), error);
        }
    }
}

/// Extract the directory from an `'<dir>' as path` clause, if present.
fn extract_cluster_path(query: &str) -> Option<String> {
    static PATH_CLAUSE: OnceLock<Regex> = OnceLock::new();
    let re = PATH_CLAUSE
        .get_or_init(|| Regex::new(r"(?i)'([^']+)'\s+as\s+path").expect("valid path regex"));
    re.captures(query).map(|captures| captures[1].to_string())
}
