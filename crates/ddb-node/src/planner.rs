//! The coordinator's query planning path, plus forwarding for nodes that
//! are not the coordinator.

use std::time::Instant;

use ddb_exec::QueryKind;
use ddb_net::Peer;
use ddb_proto::{generate_transaction_id, Message, NodeId, Payload, QueryOutcome};
use tracing::{error, info, warn};

use crate::node::Node;

impl Node {
    /// Entry point for a client query received by this node. The active
    /// coordinator plans it; everyone else forwards it to the coordinator
    /// and relays the answer.
    pub async fn execute_query(&self, sql: &str) -> QueryOutcome {
        if self.election.is_coordinator() {
            self.plan(sql).await
        } else {
            self.forward_to_coordinator(sql).await
        }
    }

    async fn plan(&self, sql: &str) -> QueryOutcome {
        let transaction_id = generate_transaction_id();
        let kind = QueryKind::classify(sql);
        info!(
            "coordinator planning {} query for {transaction_id}",
            kind.as_str()
        );

        if kind.is_write() {
            self.plan_write(sql, transaction_id).await
        } else if kind.is_read() {
            self.plan_read(sql, transaction_id).await
        } else {
            QueryOutcome {
                success: false,
                transaction_id: Some(transaction_id),
                error: Some("Unknown query type".to_string()),
                ..Default::default()
            }
        }
    }

    // -- reads ------------------------------------------------------------

    async fn plan_read(&self, sql: &str, transaction_id: String) -> QueryOutcome {
        let mut available = self.monitor.alive_peers();
        available.push(self.node_id);

        let Some(selected) = self.balancer.select(&available, &[]) else {
            return QueryOutcome {
                success: false,
                transaction_id: Some(transaction_id),
                error: Some("No available nodes for query execution".to_string()),
                ..Default::default()
            };
        };

        let started = Instant::now();
        self.balancer.record_start(selected);

        let mut outcome = if selected == self.node_id {
            self.executor.execute(sql, &transaction_id)
        } else {
            self.read_on_replica(sql, selected, &transaction_id).await
        };

        let elapsed = started.elapsed().as_secs_f64();
        self.balancer.record_end(selected, elapsed);

        outcome.selected_node = Some(selected);
        outcome.node_id = Some(selected);
        outcome.coordinator_id = Some(self.node_id);
        outcome.response_time = Some(elapsed);
        outcome
    }

    async fn read_on_replica(
        &self,
        sql: &str,
        selected: NodeId,
        transaction_id: &str,
    ) -> QueryOutcome {
        let Some(peer) = self.all_nodes.iter().find(|p| p.id == selected) else {
            return QueryOutcome::failure(format!("node {selected} is not in the cluster"));
        };

        let msg = Message::new(
            self.node_id,
            Payload::Query {
                query: sql.to_string(),
                transaction_id: Some(transaction_id.to_string()),
                from_coordinator: true,
            },
        )
        .to(selected)
        .seal();

        match self.client.request(peer, &msg).await {
            Ok(resp) => unwrap_query_response(resp)
                .unwrap_or_else(|e| QueryOutcome::failure(format!("invalid response: {e}"))),
            Err(e) => {
                error!("error executing remote query on {peer}: {e:#}");
                QueryOutcome::failure(format!("error executing remote query: {e:#}"))
            }
        }
    }

    // -- writes -----------------------------------------------------------

    async fn plan_write(&self, sql: &str, transaction_id: String) -> QueryOutcome {
        info!("handling write query with 2PC for {transaction_id}");

        let participants: Vec<Peer> = self
            .all_nodes
            .iter()
            .filter(|p| p.id == self.node_id || self.monitor.is_alive(p.id))
            .cloned()
            .collect();

        let result = self.two_pc.execute(&transaction_id, sql, &participants).await;

        if !result.success {
            return QueryOutcome {
                success: false,
                transaction_id: Some(transaction_id),
                coordinator_id: Some(self.node_id),
                phase: Some(result.phase),
                error: result.error,
                ..Default::default()
            };
        }

        // The coordinator is the implicit YES participant; its own write
        // happens after the decision rather than through a PREPARE round.
        let local = self.executor.execute(sql, &transaction_id);
        if !local.success {
            warn!(
                "local write for committed transaction {transaction_id} failed: {}",
                local.error.as_deref().unwrap_or("unknown error")
            );
        }

        QueryOutcome {
            success: true,
            transaction_id: Some(transaction_id),
            node_id: Some(self.node_id),
            coordinator_id: Some(self.node_id),
            participants: Some(result.participants),
            replicated_to: Some(result.committed_nodes),
            data: local.data,
            affected_rows: Some(local.affected_rows.unwrap_or(0)),
            error: local.error.or(result.error),
            ..Default::default()
        }
    }

    // -- forwarding -------------------------------------------------------

    async fn forward_to_coordinator(&self, sql: &str) -> QueryOutcome {
        let Some(coordinator_id) = self.election.coordinator_id() else {
            return QueryOutcome::failure("No coordinator available");
        };
        let Some(peer) = self.all_nodes.iter().find(|p| p.id == coordinator_id) else {
            return QueryOutcome::failure("Coordinator node not found");
        };

        let msg = Message::new(
            self.node_id,
            Payload::Query {
                query: sql.to_string(),
                transaction_id: Some(generate_transaction_id()),
                from_coordinator: false,
            },
        )
        .to(coordinator_id)
        .seal();

        match self.client.request(peer, &msg).await {
            Ok(resp) => unwrap_query_response(resp).unwrap_or_else(|e| {
                warn!("coordinator answered with unexpected payload: {e}");
                QueryOutcome::failure("No response from coordinator")
            }),
            Err(e) => {
                error!("failed to contact coordinator {peer}: {e:#}");
                QueryOutcome::failure(format!("Failed to contact coordinator: {e:#}"))
            }
        }
    }
}

/// Pull the planner outcome out of a `QUERY_RESPONSE` (or map an `ERROR`
/// reply onto a failed outcome).
pub(crate) fn unwrap_query_response(resp: Message) -> Result<QueryOutcome, String> {
    match resp.payload {
        Payload::QueryResponse {
            success,
            result,
            error,
        } => Ok(result.unwrap_or(QueryOutcome {
            success,
            error,
            ..Default::default()
        })),
        Payload::Error { error, .. } => Ok(QueryOutcome::failure(error)),
        other => Err(format!("unexpected response type {}", other.type_name())),
    }
}
