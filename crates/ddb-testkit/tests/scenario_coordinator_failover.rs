use std::time::Duration;

#[tokio::test]
async fn surviving_nodes_elect_next_highest_and_keep_serving_writes() -> anyhow::Result<()> {
    let mut cluster = ddb_testkit::start_cluster(3).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(cluster.node(3).node.is_coordinator());

    // Node 3 goes silent.
    cluster.stop(3).await;

    // Failure detection (timeout 400ms) + election rounds need a little
    // headroom; both survivors may race elections before converging.
    tokio::time::sleep(Duration::from_secs(4)).await;

    assert_eq!(
        cluster.node(2).node.coordinator_id(),
        Some(2),
        "node 2 is the highest live id and must win"
    );
    assert!(cluster.node(2).node.is_coordinator());
    assert_eq!(
        cluster.node(1).node.coordinator_id(),
        Some(2),
        "node 1 must adopt the announced coordinator"
    );
    assert_eq!(cluster.node(1).node.alive_peers(), vec![2]);

    // A write through the demoted path still succeeds, now with two
    // participants.
    let out = cluster.query(1, "INSERT INTO t VALUES (2,'y')").await?;
    assert!(out.success, "write after failover failed: {:?}", out.error);
    assert_eq!(out.coordinator_id, Some(2));
    assert_eq!(out.participants, Some(2));

    assert_eq!(cluster.node(1).executor.applied_count(), 1);
    assert_eq!(cluster.node(2).executor.applied_count(), 1);
    assert_eq!(
        cluster.node(3).executor.applied_count(),
        0,
        "a stopped node sees nothing"
    );

    cluster.shutdown().await;
    Ok(())
}
