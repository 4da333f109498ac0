use std::time::Duration;

#[tokio::test]
async fn committed_write_applies_exactly_once_on_every_node() -> anyhow::Result<()> {
    let cluster = ddb_testkit::start_cluster(3).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let out = cluster.query(3, "INSERT INTO t VALUES (1,'x')").await?;
    assert!(out.success, "write failed: {:?}", out.error);
    assert!(out.transaction_id.as_deref().unwrap().starts_with("TXN-"));
    assert_eq!(out.participants, Some(3));
    assert_eq!(out.affected_rows, Some(1));
    assert_eq!(out.coordinator_id, Some(3));

    // Every live participant executed the statement exactly once, and no
    // prepared map still holds the transaction.
    for n in &cluster.nodes {
        assert_eq!(
            n.executor.applied_count(),
            1,
            "node {} must apply the write exactly once",
            n.id
        );
        assert_eq!(n.node.prepared_count(), 0, "prepared map must be drained");
    }

    // The write is visible to a subsequent read wherever it lands.
    let read = cluster.query(3, "SELECT * FROM t").await?;
    assert!(read.success);
    assert_eq!(read.row_count, Some(1));

    cluster.shutdown().await;
    Ok(())
}
