use std::time::Duration;

use ddb_net::read_frame;
use ddb_proto::{Message, Payload};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

#[tokio::test]
async fn tampered_message_is_rejected_without_state_change() -> anyhow::Result<()> {
    let cluster = ddb_testkit::start_cluster(2).await?;

    // Seal a legitimate write, then mutate the statement in flight.
    let msg = Message::new(
        0,
        Payload::Query {
            query: "INSERT INTO t VALUES (1)".to_string(),
            transaction_id: None,
            from_coordinator: false,
        },
    )
    .seal();

    let mut raw = serde_json::to_value(&msg)?;
    raw["data"]["query"] = serde_json::Value::String("DROP TABLE t".to_string());
    let tampered = serde_json::to_vec(&raw)?;

    let addr = format!("{}:{}", cluster.node(2).peer.host, cluster.node(2).peer.port);
    let mut stream = TcpStream::connect(addr).await?;
    stream
        .write_all(&(tampered.len() as u32).to_be_bytes())
        .await?;
    stream.write_all(&tampered).await?;

    let reply = read_frame(&mut stream).await?;
    match reply.payload {
        Payload::Error { error, .. } => {
            assert!(
                error.contains("checksum verification failed"),
                "unexpected error: {error}"
            );
        }
        other => panic!("expected ERROR, got {}", other.type_name()),
    }

    // Nothing was dispatched, so no executor saw the statement.
    tokio::time::sleep(Duration::from_millis(200)).await;
    for n in &cluster.nodes {
        assert_eq!(n.executor.applied_count(), 0);
        assert_eq!(n.node.prepared_count(), 0);
    }

    cluster.shutdown().await;
    Ok(())
}
