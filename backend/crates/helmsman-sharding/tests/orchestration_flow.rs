//! End-to-end orchestration flow over the mock engine: provision storage,
//! form a group, fan out membership, drain per-node queues and persist the
//! membership fingerprint.

use std::sync::Arc;

use serde_json::json;

use helmsman_commons::NodeId;
use helmsman_link::test_utils::MockEngine;
use helmsman_link::EngineClient;
use helmsman_sharding::{Cluster, Queue, State};

#[test]
fn test_full_orchestration_flow() {
    let engine = Arc::new(MockEngine::new());
    let client: Arc<dyn EngineClient> = engine.clone();

    let local = NodeId::new("127.0.0.1:9312");
    let remote = NodeId::new("10.0.0.2:9312");

    let cluster = Arc::new(Cluster::new(client.clone(), "c1", local.clone()));
    let queue = Queue::new(cluster.clone(), client.clone());
    let state = State::new(client.clone());
    state.set_cluster(cluster.clone());

    // Provision orchestration storage.
    queue.setup().unwrap();
    state.setup().unwrap();
    assert!(!state.is_active().unwrap());

    // Form the group through the queue, then gate the remote join on it.
    let create_id = cluster.create(Some(&queue)).unwrap();
    queue.set_wait_for_id(create_id);
    cluster.add_node_ids(&queue, &[remote.clone()]).unwrap();
    queue.reset_wait_for_id();

    // The remote node's dispatch loop runs first: its join entry is gated
    // on the unprocessed create entry, so nothing executes.
    queue.process(&remote).unwrap();
    assert!(engine.requests().iter().all(|q| !q.starts_with("JOIN CLUSTER")));

    // The local dispatch loop forms the group; the remote loop then joins.
    queue.process(&local).unwrap();
    queue.process(&remote).unwrap();

    let executed: Vec<String> = engine
        .requests()
        .into_iter()
        .filter(|q| q.starts_with("CREATE CLUSTER") || q.starts_with("JOIN CLUSTER"))
        .collect();
    assert_eq!(executed.len(), 2);
    assert!(executed[0].starts_with("CREATE CLUSTER IF NOT EXISTS c1"));
    assert!(executed[1].starts_with("JOIN CLUSTER c1 at '127.0.0.1:9312'"));

    // Membership now reflects the runtime-added node even before the
    // replication view catches up.
    engine.set_status_var("cluster_c1_nodes_set", "127.0.0.1:9312");
    let nodes = cluster.get_nodes().unwrap();
    assert!(nodes.contains(&local));
    assert!(nodes.contains(&remote));

    // Persist the orchestration facts and bootstrap-complete the state.
    let fingerprint = Cluster::nodes_hash(&nodes);
    state.set("cluster", &json!("c1")).unwrap();
    state.set("cluster_hash", &json!(fingerprint.clone())).unwrap();
    state.set("master", &json!(local.as_str())).unwrap();
    assert!(state.is_active().unwrap());
    assert_eq!(state.get("cluster_hash").unwrap(), json!(fingerprint));

    // Shard relocation: detach leaves the old placement before attach.
    cluster
        .add_pending_table("events", helmsman_sharding::TableOperation::Attach)
        .add_pending_table("legacy", helmsman_sharding::TableOperation::Detach);
    cluster.process_pending_tables(&queue).unwrap();
    queue.process(&local).unwrap();

    let shard_ops: Vec<String> = engine
        .requests()
        .into_iter()
        .filter(|q| {
            q.starts_with("ALTER CLUSTER c1 DROP") || q.starts_with("ALTER CLUSTER c1 ADD events")
        })
        .collect();
    assert_eq!(shard_ops.len(), 2);
    assert_eq!(shard_ops[0], "ALTER CLUSTER c1 DROP legacy");
    assert_eq!(shard_ops[1], "ALTER CLUSTER c1 ADD events");
}
