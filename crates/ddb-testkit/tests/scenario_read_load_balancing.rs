use std::time::Duration;

#[tokio::test]
async fn round_robin_reads_rotate_over_all_live_nodes() -> anyhow::Result<()> {
    let cluster = ddb_testkit::start_cluster(3).await?;
    // Let the first heartbeats land.
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(cluster.node(3).node.is_coordinator(), "boot coordinator is the max id");

    // With round-robin and a fresh index, three consecutive reads issued
    // to the coordinator dispatch to nodes 1, 2, 3 in order.
    for expected in [1u64, 2, 3] {
        let out = cluster.query(3, "SELECT * FROM t").await?;
        assert!(out.success, "read failed: {:?}", out.error);
        assert_eq!(out.coordinator_id, Some(3));
        assert_eq!(out.node_id, Some(expected), "round-robin order violated");
        assert!(out.response_time.is_some());
    }

    cluster.shutdown().await;
    Ok(())
}
