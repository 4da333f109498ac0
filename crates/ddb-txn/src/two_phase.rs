use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ddb_exec::QueryExecutor;
use ddb_net::{NetClient, Peer};
use ddb_proto::{LockMode, Message, NodeId, Payload};
use tracing::{debug, error, info, warn};

use crate::lock_manager::LockManager;
use crate::registry::TransactionRegistry;

/// Single resource serializing write transactions on a node. Statement
/// classification stops at the first keyword, so table-level granularity
/// is not available to the lock layer.
pub const WRITE_LOCK_RESOURCE: &str = "__writes__";

/// Result of one full 2PC round, as the coordinator reports it.
#[derive(Debug, Clone)]
pub struct TwoPhaseOutcome {
    pub success: bool,
    pub transaction_id: String,
    /// Phase reached: "prepare" when the round aborted during voting,
    /// "commit" once the decision was Commit.
    pub phase: String,
    pub participants: usize,
    pub committed_nodes: Vec<NodeId>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Coordinator side
// ---------------------------------------------------------------------------

/// Drives the two phases against every participant. The coordinator node
/// itself is an implicit YES and is skipped on the wire; its local write
/// happens after the round, outside this type.
pub struct CommitCoordinator {
    node_id: NodeId,
    client: NetClient,
}

impl CommitCoordinator {
    pub fn new(node_id: NodeId, client: NetClient) -> Self {
        Self { node_id, client }
    }

    pub async fn execute(
        &self,
        transaction_id: &str,
        query: &str,
        participants: &[Peer],
    ) -> TwoPhaseOutcome {
        info!(
            "starting 2PC for transaction {transaction_id} with {} participants",
            participants.len()
        );

        let votes_no = self.phase1_prepare(transaction_id, query, participants).await;

        if !votes_no.is_empty() {
            warn!("prepare phase failed for {transaction_id}, aborting");
            self.phase2_abort(transaction_id, participants).await;
            return TwoPhaseOutcome {
                success: false,
                transaction_id: transaction_id.to_string(),
                phase: "prepare".to_string(),
                participants: participants.len(),
                committed_nodes: Vec::new(),
                error: Some(format!(
                    "nodes {votes_no:?} voted NO or failed to respond"
                )),
            };
        }

        let (committed, failed) = self.phase2_commit(transaction_id, participants).await;

        // Classic 2PC limitation: once every vote was YES the decision is
        // Commit, even if an ack never arrives.
        let error = if failed.is_empty() {
            None
        } else {
            error!(
                "nodes {failed:?} failed to acknowledge COMMIT for {transaction_id}; \
                 decision remains commit"
            );
            Some(format!("nodes {failed:?} failed to acknowledge commit"))
        };

        info!("2PC completed for transaction {transaction_id}");
        TwoPhaseOutcome {
            success: true,
            transaction_id: transaction_id.to_string(),
            phase: "commit".to_string(),
            participants: participants.len(),
            committed_nodes: committed,
            error,
        }
    }

    /// Returns the ids that did NOT vote YES (vote NO, no response,
    /// unexpected response, transport failure).
    async fn phase1_prepare(
        &self,
        transaction_id: &str,
        query: &str,
        participants: &[Peer],
    ) -> Vec<NodeId> {
        info!("phase 1 (PREPARE) for transaction {transaction_id}");

        let prepare = Message::new(
            self.node_id,
            Payload::TransactionPrepare {
                transaction_id: transaction_id.to_string(),
                query: query.to_string(),
            },
        )
        .seal();

        let remote: Vec<Peer> = participants
            .iter()
            .filter(|p| p.id != self.node_id)
            .cloned()
            .collect();
        let responses = self.client.broadcast(&remote, &prepare, true).await;

        let mut votes_no: Vec<NodeId> = responses
            .iter()
            .filter_map(|(id, resp)| match resp {
                Some(m) if matches!(m.payload, Payload::TransactionVoteYes { .. }) => {
                    debug!("node {id} voted YES");
                    None
                }
                Some(m) if matches!(m.payload, Payload::TransactionVoteNo { .. }) => {
                    debug!("node {id} voted NO");
                    Some(*id)
                }
                Some(m) => {
                    warn!("invalid prepare response from node {id}: {}", m.type_name());
                    Some(*id)
                }
                None => {
                    warn!("no response from node {id}");
                    Some(*id)
                }
            })
            .collect();
        votes_no.sort_unstable();
        votes_no
    }

    /// Returns `(committed, failed)` node id sets; self counts committed.
    async fn phase2_commit(
        &self,
        transaction_id: &str,
        participants: &[Peer],
    ) -> (Vec<NodeId>, Vec<NodeId>) {
        info!("phase 2 (COMMIT) for transaction {transaction_id}");

        let commit = Message::new(
            self.node_id,
            Payload::TransactionCommit {
                transaction_id: transaction_id.to_string(),
            },
        )
        .seal();

        let remote: Vec<Peer> = participants
            .iter()
            .filter(|p| p.id != self.node_id)
            .cloned()
            .collect();
        let responses = self.client.broadcast(&remote, &commit, true).await;

        let mut committed: Vec<NodeId> = participants
            .iter()
            .filter(|p| p.id == self.node_id)
            .map(|p| p.id)
            .collect();
        let mut failed = Vec::new();
        for (id, resp) in &responses {
            match resp {
                Some(m) if matches!(m.payload, Payload::Ack { .. }) => {
                    debug!("node {id} committed");
                    committed.push(*id);
                }
                Some(m) => {
                    warn!("node {id} failed to commit: answered {}", m.type_name());
                    failed.push(*id);
                }
                None => {
                    warn!("node {id} failed to commit: no acknowledgement");
                    failed.push(*id);
                }
            }
        }
        committed.sort_unstable();
        failed.sort_unstable();
        (committed, failed)
    }

    /// Fire-and-forget ABORT to every remote participant.
    async fn phase2_abort(&self, transaction_id: &str, participants: &[Peer]) {
        info!("phase 2 (ABORT) for transaction {transaction_id}");

        let abort = Message::new(
            self.node_id,
            Payload::TransactionAbort {
                transaction_id: transaction_id.to_string(),
            },
        )
        .seal();

        let remote: Vec<Peer> = participants
            .iter()
            .filter(|p| p.id != self.node_id)
            .cloned()
            .collect();
        self.client.broadcast(&remote, &abort, false).await;
    }
}

// ---------------------------------------------------------------------------
// Participant side
// ---------------------------------------------------------------------------

/// Answers PREPARE / COMMIT / ABORT on a node. The prepared map holds the
/// statement for every YES vote until its decision arrives; COMMIT for a
/// transaction that never prepared here is answered with an error.
pub struct CommitParticipant {
    node_id: NodeId,
    registry: Arc<TransactionRegistry>,
    executor: Arc<dyn QueryExecutor>,
    locks: Arc<LockManager>,
    lock_wait: Duration,
    prepared: Mutex<HashMap<String, String>>,
}

impl CommitParticipant {
    pub fn new(
        node_id: NodeId,
        registry: Arc<TransactionRegistry>,
        executor: Arc<dyn QueryExecutor>,
        lock_wait: Duration,
    ) -> Self {
        let locks = Arc::clone(registry.lock_manager());
        Self {
            node_id,
            registry,
            executor,
            locks,
            lock_wait,
            prepared: Mutex::new(HashMap::new()),
        }
    }

    pub async fn handle_prepare(&self, transaction_id: &str, query: &str) -> Message {
        info!("handling PREPARE for transaction {transaction_id}");

        self.registry.begin(Some(transaction_id));

        // Writers are serialized per node; a lock-wait timeout breaks the
        // deadlock and the transaction aborts with a NO vote.
        let locked = self
            .locks
            .acquire(
                WRITE_LOCK_RESOURCE,
                transaction_id,
                LockMode::Exclusive,
                Some(self.lock_wait),
            )
            .await;
        if !locked {
            warn!("voting NO for {transaction_id}: write lock wait timed out");
            self.registry.abort(transaction_id);
            return self.vote(transaction_id, false);
        }

        let (can_commit, error) = self.executor.prepare(query, transaction_id);
        if !can_commit {
            warn!(
                "voting NO for {transaction_id}: {}",
                error.as_deref().unwrap_or("prepare failed")
            );
            self.registry.abort(transaction_id);
            return self.vote(transaction_id, false);
        }

        if !self.registry.prepare(transaction_id) {
            warn!("voting NO for {transaction_id}: registry refused prepare");
            self.registry.abort(transaction_id);
            return self.vote(transaction_id, false);
        }

        self.prepared
            .lock()
            .expect("prepared map poisoned")
            .insert(transaction_id.to_string(), query.to_string());

        info!("voting YES for transaction {transaction_id}");
        self.vote(transaction_id, true)
    }

    pub fn handle_commit(&self, transaction_id: &str) -> Message {
        info!("handling COMMIT for transaction {transaction_id}");

        let query = self
            .prepared
            .lock()
            .expect("prepared map poisoned")
            .get(transaction_id)
            .cloned();

        let Some(query) = query else {
            error!("COMMIT for transaction {transaction_id} without prior PREPARE");
            return Message::error_response(
                self.node_id,
                Some(transaction_id.to_string()),
                format!("transaction {transaction_id} not prepared"),
            );
        };

        let result = self.executor.commit_prepared(&query, transaction_id);
        if !result.success {
            error!(
                "commit of prepared statement for {transaction_id} reported failure: {}",
                result.error.as_deref().unwrap_or("unknown error")
            );
        }

        self.registry.commit(transaction_id);
        self.prepared
            .lock()
            .expect("prepared map poisoned")
            .remove(transaction_id);

        info!("committed transaction {transaction_id}");
        Message::new(
            self.node_id,
            Payload::Ack {
                transaction_id: transaction_id.to_string(),
                status: "committed".to_string(),
            },
        )
        .seal()
    }

    /// No reply; aborting an unknown transaction is a no-op.
    pub fn handle_abort(&self, transaction_id: &str) {
        info!("handling ABORT for transaction {transaction_id}");

        let query = self
            .prepared
            .lock()
            .expect("prepared map poisoned")
            .remove(transaction_id);
        if let Some(query) = query {
            self.executor.abort_prepared(&query, transaction_id);
        }
        self.registry.abort(transaction_id);
    }

    pub fn prepared_count(&self) -> usize {
        self.prepared.lock().expect("prepared map poisoned").len()
    }

    fn vote(&self, transaction_id: &str, yes: bool) -> Message {
        let payload = if yes {
            Payload::TransactionVoteYes {
                transaction_id: transaction_id.to_string(),
            }
        } else {
            Payload::TransactionVoteNo {
                transaction_id: transaction_id.to_string(),
            }
        };
        Message::new(self.node_id, payload).seal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TxnState;
    use ddb_exec::MemoryExecutor;

    fn participant() -> (CommitParticipant, Arc<MemoryExecutor>) {
        let locks = Arc::new(LockManager::new());
        let registry = Arc::new(TransactionRegistry::new(1, locks));
        let executor = Arc::new(MemoryExecutor::new(1));
        let p = CommitParticipant::new(
            1,
            registry,
            Arc::clone(&executor) as Arc<dyn QueryExecutor>,
            Duration::from_millis(200),
        );
        (p, executor)
    }

    #[tokio::test]
    async fn prepare_then_commit_applies_once() {
        let (p, exec) = participant();

        let vote = p.handle_prepare("TXN-a", "INSERT INTO t VALUES (1)").await;
        assert!(matches!(vote.payload, Payload::TransactionVoteYes { .. }));
        assert_eq!(p.prepared_count(), 1);
        assert_eq!(p.registry.state_of("TXN-a"), Some(TxnState::Prepared));
        assert_eq!(exec.applied_count(), 0, "nothing applied before COMMIT");

        let ack = p.handle_commit("TXN-a");
        assert!(matches!(ack.payload, Payload::Ack { .. }));
        assert_eq!(exec.applied_count(), 1);
        assert_eq!(p.prepared_count(), 0);
        assert_eq!(p.registry.state_of("TXN-a"), None);
        // Write lock is free again.
        assert!(
            p.locks
                .acquire(WRITE_LOCK_RESOURCE, "TXN-b", LockMode::Exclusive, Some(Duration::ZERO))
                .await
        );
    }

    #[tokio::test]
    async fn commit_without_prepare_is_an_error() {
        let (p, exec) = participant();
        let reply = p.handle_commit("TXN-ghost");
        match reply.payload {
            Payload::Error { error, .. } => assert!(error.contains("not prepared")),
            other => panic!("unexpected payload: {}", other.type_name()),
        }
        assert_eq!(exec.applied_count(), 0);
    }

    #[tokio::test]
    async fn rejected_prepare_votes_no_and_aborts() {
        let (p, exec) = participant();
        exec.reject_prepare_containing("users");

        let vote = p.handle_prepare("TXN-a", "INSERT INTO users VALUES (1)").await;
        assert!(matches!(vote.payload, Payload::TransactionVoteNo { .. }));
        assert_eq!(p.prepared_count(), 0);
        assert_eq!(p.registry.state_of("TXN-a"), None);
        assert!(
            p.locks
                .acquire(WRITE_LOCK_RESOURCE, "TXN-b", LockMode::Exclusive, Some(Duration::ZERO))
                .await,
            "write lock must be released after a NO vote"
        );
    }

    #[tokio::test]
    async fn abort_discards_prepared_statement() {
        let (p, exec) = participant();
        p.handle_prepare("TXN-a", "DELETE FROM t").await;
        p.handle_abort("TXN-a");
        assert_eq!(p.prepared_count(), 0);
        assert_eq!(exec.applied_count(), 0);
        // Unknown transaction: no-op.
        p.handle_abort("TXN-never-seen");
    }

    #[tokio::test]
    async fn coordinator_aborts_when_all_peers_unreachable() {
        let coordinator = CommitCoordinator::new(3, NetClient::new(Duration::from_millis(200)));
        let participants = [
            Peer::new(1, "127.0.0.1", 9),
            Peer::new(2, "127.0.0.1", 9),
            Peer::new(3, "127.0.0.1", 9),
        ];
        let outcome = coordinator
            .execute("TXN-a", "INSERT INTO t VALUES (1)", &participants)
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.phase, "prepare");
        assert!(outcome.error.unwrap().contains("[1, 2]"));
    }
}
