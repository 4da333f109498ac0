use std::time::Duration;

#[tokio::test]
async fn non_coordinator_forwards_to_coordinator_and_relays_result() -> anyhow::Result<()> {
    let cluster = ddb_testkit::start_cluster(3).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(!cluster.node(1).node.is_coordinator());

    // The client talks to node 1; node 1 forwards to coordinator 3, which
    // load-balances the read (first round-robin pick over {1,2,3} is 1).
    let out = cluster.query(1, "SELECT * FROM t").await?;
    assert!(out.success, "forwarded read failed: {:?}", out.error);
    assert_eq!(out.coordinator_id, Some(3), "planned by the coordinator");
    assert_eq!(out.node_id, Some(1), "executed by the selected replica");

    // Writes forward the same way.
    let write = cluster.query(2, "INSERT INTO t VALUES (7,'z')").await?;
    assert!(write.success, "forwarded write failed: {:?}", write.error);
    assert_eq!(write.coordinator_id, Some(3));
    assert_eq!(write.participants, Some(3));

    cluster.shutdown().await;
    Ok(())
}
