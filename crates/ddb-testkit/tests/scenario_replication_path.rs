use ddb_proto::Payload;

#[tokio::test]
async fn replication_request_applies_locally_and_acks() -> anyhow::Result<()> {
    let cluster = ddb_testkit::start_cluster(2).await?;

    let reply = cluster
        .send(
            1,
            Payload::Replication {
                query: "INSERT INTO t VALUES (5)".to_string(),
                transaction_id: "TXN-repl-1".to_string(),
            },
        )
        .await?;
    match reply.payload {
        Payload::ReplicationAck {
            transaction_id,
            status,
        } => {
            assert_eq!(transaction_id, "TXN-repl-1");
            assert_eq!(status, "success");
        }
        other => panic!("expected REPLICATION_ACK, got {}", other.type_name()),
    }
    assert_eq!(cluster.node(1).executor.applied_count(), 1);

    // A failing local execution is answered with a NACK carrying the error.
    cluster.node(2).executor.fail_execute_containing("orders");
    let reply = cluster
        .send(
            2,
            Payload::Replication {
                query: "DELETE FROM orders".to_string(),
                transaction_id: "TXN-repl-2".to_string(),
            },
        )
        .await?;
    match reply.payload {
        Payload::ReplicationNack { error, .. } => {
            assert!(error.unwrap().contains("orders"));
        }
        other => panic!("expected REPLICATION_NACK, got {}", other.type_name()),
    }
    assert_eq!(cluster.node(2).executor.applied_count(), 0);

    cluster.shutdown().await;
    Ok(())
}
