use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checksum::checksum_of;
use crate::ids::generate_message_id;

pub type NodeId = u64;

// ---------------------------------------------------------------------------
// Message envelope
// ---------------------------------------------------------------------------

/// One wire message. `payload` flattens into the JSON envelope as the
/// sibling fields `type` and `data`, so the serialized form is
/// `{message_id, type, sender_id, [receiver_id], timestamp, data, checksum}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub sender_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<NodeId>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl Message {
    /// Fresh unsealed envelope. Call [`Message::seal`] before sending.
    pub fn new(sender_id: NodeId, payload: Payload) -> Self {
        Self {
            message_id: generate_message_id(),
            sender_id,
            receiver_id: None,
            timestamp: Utc::now(),
            payload,
            checksum: None,
        }
    }

    /// Address the message to a specific node.
    pub fn to(mut self, receiver_id: NodeId) -> Self {
        self.receiver_id = Some(receiver_id);
        self
    }

    /// Compute and store the checksum over the canonical serialization of
    /// every other field.
    pub fn seal(mut self) -> Self {
        self.checksum = None;
        self.checksum = Some(checksum_of(&self));
        self
    }

    /// True iff the stored checksum matches a recomputation. A message
    /// without a checksum never verifies.
    pub fn verify(&self) -> bool {
        match &self.checksum {
            Some(stored) => {
                let mut clone = self.clone();
                clone.checksum = None;
                checksum_of(&clone) == *stored
            }
            None => false,
        }
    }

    /// The wire name of the payload type, for logging.
    pub fn type_name(&self) -> &'static str {
        self.payload.type_name()
    }

    /// Sealed `QUERY_RESPONSE` wrapping an execution outcome, mirroring the
    /// outcome's own success flag.
    pub fn query_response(sender_id: NodeId, outcome: QueryOutcome) -> Self {
        let success = outcome.success;
        Message::new(
            sender_id,
            Payload::QueryResponse {
                success,
                result: Some(outcome),
                error: None,
            },
        )
        .seal()
    }

    /// Sealed `ERROR` response.
    pub fn error_response(
        sender_id: NodeId,
        transaction_id: Option<String>,
        error: impl Into<String>,
    ) -> Self {
        Message::new(
            sender_id,
            Payload::Error {
                transaction_id,
                error: error.into(),
            },
        )
        .seal()
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Closed set of wire message types, one variant per type. The
/// `TRANSACTION_ROLLBACK` and `LOCK_*` variants are carried for protocol
/// completeness; no core handler dispatches them yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Payload {
    Query {
        query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transaction_id: Option<String>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        from_coordinator: bool,
    },
    Replication {
        query: String,
        transaction_id: String,
    },
    Heartbeat {},
    HeartbeatAck {},
    Election {},
    ElectionOk {},
    CoordinatorAnnouncement {},
    TransactionPrepare {
        transaction_id: String,
        query: String,
    },
    TransactionVoteYes {
        transaction_id: String,
    },
    TransactionVoteNo {
        transaction_id: String,
    },
    TransactionCommit {
        transaction_id: String,
    },
    TransactionAbort {
        transaction_id: String,
    },
    TransactionRollback {
        transaction_id: String,
    },
    QueryResponse {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<QueryOutcome>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ReplicationAck {
        transaction_id: String,
        status: String,
    },
    ReplicationNack {
        transaction_id: String,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transaction_id: Option<String>,
        error: String,
    },
    Ack {
        transaction_id: String,
        status: String,
    },
    NodeStatus {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        report: Option<NodeStatusReport>,
    },
    HealthCheck {},
    HealthResponse {
        cluster: ClusterHealth,
    },
    LockRequest {
        resource: String,
        transaction_id: String,
        mode: LockMode,
    },
    LockGranted {
        resource: String,
        transaction_id: String,
        mode: LockMode,
    },
    LockDenied {
        resource: String,
        transaction_id: String,
        mode: LockMode,
    },
    LockRelease {
        resource: String,
        transaction_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<LockMode>,
    },
}

impl Payload {
    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::Query { .. } => "QUERY",
            Payload::Replication { .. } => "REPLICATION",
            Payload::Heartbeat {} => "HEARTBEAT",
            Payload::HeartbeatAck {} => "HEARTBEAT_ACK",
            Payload::Election {} => "ELECTION",
            Payload::ElectionOk {} => "ELECTION_OK",
            Payload::CoordinatorAnnouncement {} => "COORDINATOR_ANNOUNCEMENT",
            Payload::TransactionPrepare { .. } => "TRANSACTION_PREPARE",
            Payload::TransactionVoteYes { .. } => "TRANSACTION_VOTE_YES",
            Payload::TransactionVoteNo { .. } => "TRANSACTION_VOTE_NO",
            Payload::TransactionCommit { .. } => "TRANSACTION_COMMIT",
            Payload::TransactionAbort { .. } => "TRANSACTION_ABORT",
            Payload::TransactionRollback { .. } => "TRANSACTION_ROLLBACK",
            Payload::QueryResponse { .. } => "QUERY_RESPONSE",
            Payload::ReplicationAck { .. } => "REPLICATION_ACK",
            Payload::ReplicationNack { .. } => "REPLICATION_NACK",
            Payload::Error { .. } => "ERROR",
            Payload::Ack { .. } => "ACK",
            Payload::NodeStatus { .. } => "NODE_STATUS",
            Payload::HealthCheck {} => "HEALTH_CHECK",
            Payload::HealthResponse { .. } => "HEALTH_RESPONSE",
            Payload::LockRequest { .. } => "LOCK_REQUEST",
            Payload::LockGranted { .. } => "LOCK_GRANTED",
            Payload::LockDenied { .. } => "LOCK_DENIED",
            Payload::LockRelease { .. } => "LOCK_RELEASE",
        }
    }
}

// ---------------------------------------------------------------------------
// Shared payload bodies
// ---------------------------------------------------------------------------

/// Shared / exclusive lock mode as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Result of planning/executing one client query. This is the `data.result`
/// object a client consumes; every field beyond `success` is situational
/// (reads carry rows, writes carry `affected_rows` and 2PC metadata).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicated_to: Option<Vec<NodeId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_node: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Cluster-wide health summary carried by `HEALTH_RESPONSE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub total_nodes: usize,
    pub alive_nodes: usize,
    pub dead_nodes: usize,
    pub health_percentage: f64,
    pub alive_node_ids: Vec<NodeId>,
    pub dead_node_ids: Vec<NodeId>,
    pub coordinator_alive: bool,
}

/// Per-node status snapshot carried by `NODE_STATUS` responses. The nested
/// subsystem sections (heartbeat, health counters, load balancer, lock
/// table, transactions) are reported as free-form JSON produced by their
/// owning subsystems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatusReport {
    pub node_id: NodeId,
    pub is_coordinator: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator_id: Option<NodeId>,
    pub alive_peers: Vec<NodeId>,
    pub dead_peers: Vec<NodeId>,
    pub heartbeat: Value,
    pub health: Value,
    pub load_balancer: Value,
    pub locks: Value,
    pub transactions: Value,
}
