//! Replication group membership.
//!
//! A [`Cluster`] tracks the set of member nodes of one named replication
//! group, distinguishes active (synced) from inactive nodes, and batches
//! shard attach/detach operations. Membership-changing operations fan out to
//! remote nodes through the command [`Queue`](crate::queue::Queue); status
//! queries go straight to the local engine.
//!
//! An empty group name means single-node mode: membership degrades to the
//! local node and shard operations stay local.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;

use helmsman_commons::{NodeId, ShardingConfig};
use helmsman_link::EngineClient;

use crate::error::{Result, ShardingError};
use crate::queue::Queue;

/// Replication tuning options carried on group create/join statements:
/// peer timeout, install timeout, delayed keep period and bootstrap wait.
const REPLICATION_TUNING: &str = "gmcast.peer_timeout=PT3S;\
    evs.install_timeout=PT5S;\
    evs.delayed_keep_period=PT10S;\
    pc.wait_prim_timeout=PT5S";

/// Suffix marking a non-voting replication-only peer in the nodes view.
const REPLICATION_ONLY_SUFFIX: &str = ":replication";

/// A pending shard operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableOperation {
    Attach,
    Detach,
}

/// Membership of one named replication group.
pub struct Cluster {
    client: Arc<dyn EngineClient>,

    /// Group name; empty means single-node mode.
    name: String,

    /// The local node's identity, used as the join target and as the
    /// default target for queued group-wide operations.
    node_id: NodeId,

    /// Nodes added at runtime but possibly not yet visible in the
    /// replication view.
    nodes: Mutex<HashSet<NodeId>>,

    /// Shards pending a batched attach.
    tables_to_attach: Mutex<HashSet<String>>,

    /// Shards pending a batched detach.
    tables_to_detach: Mutex<HashSet<String>>,
}

impl Cluster {
    pub fn new(client: Arc<dyn EngineClient>, name: impl Into<String>, node_id: NodeId) -> Self {
        Self {
            client,
            name: name.into(),
            node_id,
            nodes: Mutex::new(HashSet::new()),
            tables_to_attach: Mutex::new(HashSet::new()),
            tables_to_detach: Mutex::new(HashSet::new()),
        }
    }

    pub fn from_config(client: Arc<dyn EngineClient>, config: &ShardingConfig) -> Self {
        Self::new(client, config.cluster.clone(), config.node_id())
    }

    /// Group name; empty means single-node mode.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The local node's identity.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Form the replication group. Idempotent at the engine layer
    /// ("if not exists"). Should run on the group's main node.
    ///
    /// Returns the queue entry ID when enqueued, 0 when issued directly.
    pub fn create(&self, queue: Option<&Queue>) -> Result<i64> {
        let query = format!(
            "CREATE CLUSTER IF NOT EXISTS {name} '{name}' as path, '{options}' as options",
            name = self.name,
            options = REPLICATION_TUNING,
        );
        self.run_query(queue, &query)
    }

    /// Force the group out of non-primary state by bootstrapping quorum on
    /// this node. Needed when quorum cannot otherwise be reached, e.g. a
    /// two-node group with one node down.
    pub fn make_primary(&self, queue: Option<&Queue>) -> Result<i64> {
        let query = format!("SET CLUSTER {} GLOBAL 'pc.bootstrap' = 1", self.name);
        self.run_query(queue, &query)
    }

    /// Tear the group down. Run on exactly one surviving node; the others
    /// detect the removal through their own replication layer.
    pub fn remove(&self, queue: Option<&Queue>) -> Result<i64> {
        let query = format!("DELETE CLUSTER {}", self.name);
        self.run_query(queue, &query)
    }

    /// Ask the group to recompute its node list, pruning inactive nodes.
    pub fn refresh(&self) -> Result<&Self> {
        let query = format!("ALTER CLUSTER {} UPDATE nodes", self.name);
        self.run_query(None, &query)?;
        Ok(self)
    }

    /// Record the given nodes as members and enqueue a join command for each
    /// of them, referencing the local node as the join target.
    pub fn add_node_ids(&self, queue: &Queue, node_ids: &[NodeId]) -> Result<&Self> {
        for node in node_ids {
            self.nodes.lock().insert(node.clone());
            let query = format!(
                "JOIN CLUSTER {name} at '{target}' '{name}' as path, '{options}' as options",
                name = self.name,
                target = self.node_id,
                options = REPLICATION_TUNING,
            );
            queue.add(node, &query)?;
        }
        Ok(self)
    }

    /// All nodes that belong to the group: the persisted replication-set
    /// view merged with nodes added at runtime.
    pub fn get_nodes(&self) -> Result<HashSet<NodeId>> {
        if self.name.is_empty() {
            return Ok(HashSet::from([self.node_id.clone()]));
        }

        let view = self
            .fetch_status(&format!("cluster_{}_nodes_set", self.name))?
            .unwrap_or_default();
        let mut set: HashSet<NodeId> = split_node_list(&view).map(NodeId::from).collect();
        set.extend(self.nodes.lock().iter().cloned());
        Ok(set)
    }

    /// Nodes currently reported as synced by the replication view.
    /// Replication-only peers are excluded: they receive writes but do not
    /// serve the group.
    pub fn get_active_nodes(&self) -> Result<HashSet<NodeId>> {
        if self.name.is_empty() {
            return Ok(HashSet::from([self.node_id.clone()]));
        }

        // Value: 127.0.0.1:9112,127.0.0.1:9124:replication,127.0.0.1:9212
        let view = self
            .fetch_status(&format!("cluster_{}_nodes_view", self.name))?
            .unwrap_or_default();
        Ok(split_node_list(&view)
            .filter(|node| !node.contains(REPLICATION_ONLY_SUFFIX))
            .map(NodeId::from)
            .collect())
    }

    /// Anomalous nodes: the symmetric difference of configured and active
    /// sets. Surfaces both configured-but-unsynced nodes (outage, still
    /// joining) and synced-but-unconfigured ones (joined out-of-band).
    pub fn get_inactive_nodes(&self) -> Result<HashSet<NodeId>> {
        let nodes = self.get_nodes()?;
        let active = self.get_active_nodes()?;
        Ok(nodes.symmetric_difference(&active).cloned().collect())
    }

    /// Whether the group reports primary status. A missing status reads as
    /// primary: a not-yet-formed group must not block orchestration.
    pub fn is_active(&self) -> Result<bool> {
        let status = self
            .fetch_status(&format!("cluster_{}_status", self.name))?
            .unwrap_or_else(|| "primary".to_string());
        Ok(status == "primary")
    }

    /// Enqueue a batched attach of the given shards to all group members.
    pub fn add_tables(&self, queue: &Queue, tables: &[&str]) -> Result<i64> {
        if tables.is_empty() {
            return Err(ShardingError::InvalidArgument(
                "Tables must be passed to add".to_string(),
            ));
        }
        let query = format!("ALTER CLUSTER {} ADD {}", self.name, tables.join(","));
        queue.add(&self.node_id, &query)
    }

    /// Enqueue a batched detach of the given shards from all group members.
    pub fn remove_tables(&self, queue: &Queue, tables: &[&str]) -> Result<i64> {
        if tables.is_empty() {
            return Err(ShardingError::InvalidArgument(
                "Tables must be passed to remove".to_string(),
            ));
        }
        let query = format!("ALTER CLUSTER {} DROP {}", self.name, tables.join(","));
        queue.add(&self.node_id, &query)
    }

    /// Attach shards synchronously on the local node. Without a named group
    /// there is nothing to fan out, so the call is local-only.
    pub fn attach_tables(&self, tables: &[&str]) -> Result<&Self> {
        if tables.is_empty() {
            return Err(ShardingError::InvalidArgument(
                "Tables must be passed to attach".to_string(),
            ));
        }
        if !self.name.is_empty() {
            let query = format!("ALTER CLUSTER {} ADD {}", self.name, tables.join(","));
            self.send_checked(&query)?;
        }
        Ok(self)
    }

    /// Detach shards synchronously on the local node.
    pub fn detach_tables(&self, tables: &[&str]) -> Result<&Self> {
        if tables.is_empty() {
            return Err(ShardingError::InvalidArgument(
                "Tables must be passed to detach".to_string(),
            ));
        }
        if !self.name.is_empty() {
            let query = format!("ALTER CLUSTER {} DROP {}", self.name, tables.join(","));
            self.send_checked(&query)?;
        }
        Ok(self)
    }

    /// Record a shard operation for the next [`Cluster::process_pending_tables`] pass.
    pub fn add_pending_table(&self, table: &str, operation: TableOperation) -> &Self {
        match operation {
            TableOperation::Attach => self.tables_to_attach.lock().insert(table.to_string()),
            TableOperation::Detach => self.tables_to_detach.lock().insert(table.to_string()),
        };
        self
    }

    /// Whether a shard operation is pending.
    pub fn has_pending_table(&self, table: &str, operation: TableOperation) -> bool {
        match operation {
            TableOperation::Attach => self.tables_to_attach.lock().contains(table),
            TableOperation::Detach => self.tables_to_detach.lock().contains(table),
        }
    }

    /// Flush pending shard operations: all detaches first, then all
    /// attaches, one queued command each. A relocated shard must leave its
    /// old placement before joining a new one, or two placements would own
    /// it at once.
    pub fn process_pending_tables(&self, queue: &Queue) -> Result<&Self> {
        let detaches = sorted_tables(&self.tables_to_detach);
        if !detaches.is_empty() {
            let refs: Vec<&str> = detaches.iter().map(String::as_str).collect();
            self.remove_tables(queue, &refs)?;
            self.tables_to_detach.lock().clear();
        }

        let attaches = sorted_tables(&self.tables_to_attach);
        if !attaches.is_empty() {
            let refs: Vec<&str> = attaches.iter().map(String::as_str).collect();
            self.add_tables(queue, &refs)?;
            self.tables_to_attach.lock().clear();
        }

        Ok(self)
    }

    /// Deterministic membership fingerprint: sorted node IDs joined with a
    /// fixed delimiter, SHA-256, hex. Compared against the persisted
    /// fingerprint to detect membership drift cheaply.
    pub fn nodes_hash(nodes: &HashSet<NodeId>) -> String {
        let mut sorted: Vec<&str> = nodes.iter().map(NodeId::as_str).collect();
        sorted.sort_unstable();
        let digest = Sha256::digest(sorted.join("|").as_bytes());
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Canonical name of a cluster-scoped table: prefixed with the group
    /// name when a group exists, bare otherwise.
    pub fn table_name(&self, table: &str) -> String {
        if self.name.is_empty() {
            table.to_string()
        } else {
            format!("{}:{}", self.name, table)
        }
    }

    /// Same rule for system tables; currently identical to [`Cluster::table_name`].
    pub fn system_table_name(&self, table: &str) -> String {
        self.table_name(table)
    }

    /// Run a group command: enqueued for the local node when a queue is
    /// given, issued directly otherwise.
    fn run_query(&self, queue: Option<&Queue>, query: &str) -> Result<i64> {
        match queue {
            Some(queue) => queue.add(&self.node_id, query),
            None => {
                self.send_checked(query)?;
                Ok(0)
            }
        }
    }

    fn send_checked(&self, query: &str) -> Result<()> {
        let response = self.client.send_request(query)?;
        if response.has_error() {
            return Err(ShardingError::Engine(
                response.error().unwrap_or_default().to_string(),
            ));
        }
        Ok(())
    }

    fn fetch_status(&self, variable: &str) -> Result<Option<String>> {
        let response = self
            .client
            .send_request(&format!("SHOW STATUS LIKE '{}'", variable))?;
        Ok(response
            .first_value("Value")
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }
}

fn split_node_list(view: &str) -> impl Iterator<Item = &str> {
    view.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn sorted_tables(tables: &Mutex<HashSet<String>>) -> Vec<String> {
    let mut list: Vec<String> = tables.lock().iter().cloned().collect();
    list.sort_unstable();
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmsman_link::test_utils::MockEngine;

    fn setup() -> (Arc<MockEngine>, Arc<Cluster>) {
        let engine = Arc::new(MockEngine::new());
        let client: Arc<dyn EngineClient> = engine.clone();
        let cluster = Arc::new(Cluster::new(client, "c1", NodeId::new("127.0.0.1:9312")));
        (engine, cluster)
    }

    fn queue_for(engine: &Arc<MockEngine>, cluster: &Arc<Cluster>) -> Queue {
        engine.create_table("sharding_queue");
        Queue::new(cluster.clone(), engine.clone())
    }

    fn names(set: &HashSet<NodeId>) -> Vec<String> {
        let mut list: Vec<String> = set.iter().map(|n| n.to_string()).collect();
        list.sort();
        list
    }

    #[test]
    fn test_get_nodes_merges_runtime_members() {
        let (engine, cluster) = setup();
        let queue = queue_for(&engine, &cluster);
        engine.set_status_var("cluster_c1_nodes_set", "127.0.0.1:9312, 10.0.0.2:9312");

        cluster
            .add_node_ids(&queue, &[NodeId::new("10.0.0.3:9312")])
            .unwrap();

        let nodes = cluster.get_nodes().unwrap();
        assert_eq!(
            names(&nodes),
            vec!["10.0.0.2:9312", "10.0.0.3:9312", "127.0.0.1:9312"]
        );
    }

    #[test]
    fn test_get_nodes_unnamed_degrades_to_local() {
        let engine = Arc::new(MockEngine::new());
        let client: Arc<dyn EngineClient> = engine.clone();
        let cluster = Cluster::new(client, "", NodeId::new("127.0.0.1:9312"));

        let nodes = cluster.get_nodes().unwrap();
        assert_eq!(names(&nodes), vec!["127.0.0.1:9312"]);
        // No status query was needed.
        assert!(engine.requests().is_empty());
    }

    #[test]
    fn test_active_nodes_skip_replication_only_peers() {
        let (engine, cluster) = setup();
        engine.set_status_var(
            "cluster_c1_nodes_view",
            "127.0.0.1:9112,127.0.0.1:9124:replication,127.0.0.1:9212",
        );

        let active = cluster.get_active_nodes().unwrap();
        assert_eq!(names(&active), vec!["127.0.0.1:9112", "127.0.0.1:9212"]);
    }

    #[test]
    fn test_inactive_nodes_symmetric_difference() {
        let (engine, cluster) = setup();
        // n1 configured and active, n2 configured only, n3 active only.
        engine.set_status_var("cluster_c1_nodes_set", "n1:9312,n2:9312");
        engine.set_status_var("cluster_c1_nodes_view", "n1:9312,n3:9312");

        let inactive = cluster.get_inactive_nodes().unwrap();
        assert_eq!(names(&inactive), vec!["n2:9312", "n3:9312"]);
    }

    #[test]
    fn test_inactive_nodes_empty_when_views_agree() {
        let (engine, cluster) = setup();
        engine.set_status_var("cluster_c1_nodes_set", "n1:9312,n2:9312");
        engine.set_status_var("cluster_c1_nodes_view", "n2:9312,n1:9312");

        assert!(cluster.get_inactive_nodes().unwrap().is_empty());
    }

    #[test]
    fn test_is_active_fails_open() {
        let (engine, cluster) = setup();
        assert!(cluster.is_active().unwrap());

        engine.set_status_var("cluster_c1_status", "non-primary");
        assert!(!cluster.is_active().unwrap());

        engine.set_status_var("cluster_c1_status", "primary");
        assert!(cluster.is_active().unwrap());
    }

    #[test]
    fn test_add_node_ids_enqueues_join() {
        let (engine, cluster) = setup();
        let queue = queue_for(&engine, &cluster);

        cluster
            .add_node_ids(&queue, &[NodeId::new("10.0.0.2:9312")])
            .unwrap();

        let rows = engine.table_rows("sharding_queue");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("node").unwrap().as_str().unwrap(), "10.0.0.2:9312");
        let query = rows[0].get("query").unwrap().as_str().unwrap();
        assert!(query.starts_with("JOIN CLUSTER c1 at '127.0.0.1:9312'"));

        assert!(cluster.get_nodes().unwrap().contains(&NodeId::new("10.0.0.2:9312")));
    }

    #[test]
    fn test_nodes_hash_order_independent() {
        let a: HashSet<NodeId> = ["n1:1", "n2:1", "n3:1"].map(NodeId::from).into();
        let b: HashSet<NodeId> = ["n3:1", "n1:1", "n2:1"].map(NodeId::from).into();
        assert_eq!(Cluster::nodes_hash(&a), Cluster::nodes_hash(&b));
    }

    #[test]
    fn test_nodes_hash_changes_with_membership() {
        let a: HashSet<NodeId> = ["n1:1", "n2:1"].map(NodeId::from).into();
        let mut b = a.clone();
        b.insert(NodeId::new("n3:1"));
        assert_ne!(Cluster::nodes_hash(&a), Cluster::nodes_hash(&b));

        b.remove(&NodeId::new("n3:1"));
        assert_eq!(Cluster::nodes_hash(&a), Cluster::nodes_hash(&b));
    }

    #[test]
    fn test_add_tables_requires_tables() {
        let (engine, cluster) = setup();
        let queue = queue_for(&engine, &cluster);

        assert!(matches!(
            cluster.add_tables(&queue, &[]),
            Err(ShardingError::InvalidArgument(_))
        ));
        assert!(matches!(
            cluster.attach_tables(&[]),
            Err(ShardingError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_attach_tables_is_local_only_without_group() {
        let engine = Arc::new(MockEngine::new());
        let client: Arc<dyn EngineClient> = engine.clone();
        let cluster = Cluster::new(client, "", NodeId::new("127.0.0.1:9312"));

        cluster.attach_tables(&["shard1"]).unwrap();
        cluster.detach_tables(&["shard1"]).unwrap();
        assert!(engine.requests().is_empty());
    }

    #[test]
    fn test_attach_detach_issue_direct_statements() {
        let (engine, cluster) = setup();

        cluster.attach_tables(&["t1", "t2"]).unwrap();
        cluster.detach_tables(&["t3"]).unwrap();

        assert_eq!(engine.requests_matching("ALTER CLUSTER c1 ADD t1,t2").len(), 1);
        assert_eq!(engine.requests_matching("ALTER CLUSTER c1 DROP t3").len(), 1);
    }

    #[test]
    fn test_make_primary_and_remove() {
        let (engine, cluster) = setup();

        assert_eq!(cluster.make_primary(None).unwrap(), 0);
        assert_eq!(cluster.remove(None).unwrap(), 0);

        assert_eq!(
            engine.requests_matching("SET CLUSTER c1 GLOBAL 'pc.bootstrap' = 1").len(),
            1
        );
        assert_eq!(engine.requests_matching("DELETE CLUSTER c1").len(), 1);
    }

    #[test]
    fn test_pending_tables_detach_before_attach() {
        let (engine, cluster) = setup();
        let queue = queue_for(&engine, &cluster);

        cluster
            .add_pending_table("shard_new", TableOperation::Attach)
            .add_pending_table("shard_old", TableOperation::Detach);
        assert!(cluster.has_pending_table("shard_new", TableOperation::Attach));
        assert!(!cluster.has_pending_table("shard_new", TableOperation::Detach));

        cluster.process_pending_tables(&queue).unwrap();

        let rows = engine.table_rows("sharding_queue");
        assert_eq!(rows.len(), 2);
        let first = rows[0].get("query").unwrap().as_str().unwrap();
        let second = rows[1].get("query").unwrap().as_str().unwrap();
        assert_eq!(first, "ALTER CLUSTER c1 DROP shard_old");
        assert_eq!(second, "ALTER CLUSTER c1 ADD shard_new");

        // Both sets were cleared; a second pass issues nothing.
        assert!(!cluster.has_pending_table("shard_new", TableOperation::Attach));
        cluster.process_pending_tables(&queue).unwrap();
        assert_eq!(engine.table_rows("sharding_queue").len(), 2);
    }

    #[test]
    fn test_table_name_prefixing() {
        let (_, cluster) = setup();
        assert_eq!(cluster.table_name("shard1"), "c1:shard1");
        assert_eq!(cluster.system_table_name("sharding_queue"), "c1:sharding_queue");

        let engine = Arc::new(MockEngine::new());
        let client: Arc<dyn EngineClient> = engine.clone();
        let unnamed = Cluster::new(client, "", NodeId::new("n:1"));
        assert_eq!(unnamed.table_name("shard1"), "shard1");
    }

    #[test]
    fn test_create_direct_and_queued() {
        let (engine, cluster) = setup();
        assert_eq!(cluster.create(None).unwrap(), 0);
        assert_eq!(engine.requests_matching("CREATE CLUSTER IF NOT EXISTS c1").len(), 1);

        let queue = queue_for(&engine, &cluster);
        let id = cluster.create(Some(&queue)).unwrap();
        assert!(id > 0);
        assert_eq!(engine.table_rows("sharding_queue").len(), 1);
    }

    #[test]
    fn test_refresh_issues_update_nodes() {
        let (engine, cluster) = setup();
        cluster.refresh().unwrap();
        assert_eq!(engine.requests_matching("ALTER CLUSTER c1 UPDATE nodes").len(), 1);
    }
}
