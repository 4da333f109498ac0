use std::time::Duration;

use ddb_proto::Payload;

#[tokio::test]
async fn health_check_and_node_status_report_cluster_view() -> anyhow::Result<()> {
    let mut cluster = ddb_testkit::start_cluster(3).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let reply = cluster.send(1, Payload::HealthCheck {}).await?;
    match reply.payload {
        Payload::HealthResponse { cluster: health } => {
            assert_eq!(health.alive_nodes, 2, "both remote peers alive");
            assert_eq!(health.dead_nodes, 0);
            assert_eq!(health.health_percentage, 100.0);
            assert!(health.coordinator_alive);
        }
        other => panic!("expected HEALTH_RESPONSE, got {}", other.type_name()),
    }

    let reply = cluster.send(3, Payload::NodeStatus { report: None }).await?;
    match reply.payload {
        Payload::NodeStatus { report: Some(report) } => {
            assert_eq!(report.node_id, 3);
            assert!(report.is_coordinator);
            assert_eq!(report.coordinator_id, Some(3));
            assert_eq!(report.alive_peers, vec![1, 2]);
            assert_eq!(report.transactions["count"], 0);
            assert_eq!(report.locks["total_resources"], 0);
            assert_eq!(report.load_balancer["strategy"], "round_robin");
        }
        other => panic!("expected NODE_STATUS report, got {}", other.type_name()),
    }

    // After a peer dies, health reflects it.
    cluster.stop(2).await;
    tokio::time::sleep(Duration::from_millis(800)).await;

    let reply = cluster.send(1, Payload::HealthCheck {}).await?;
    match reply.payload {
        Payload::HealthResponse { cluster: health } => {
            assert_eq!(health.alive_node_ids, vec![3]);
            assert_eq!(health.dead_node_ids, vec![2]);
        }
        other => panic!("expected HEALTH_RESPONSE, got {}", other.type_name()),
    }

    cluster.shutdown().await;
    Ok(())
}
