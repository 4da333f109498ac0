use chrono::{DateTime, Utc};
use ddb_proto::{NodeId, QueryOutcome};
use serde::{Deserialize, Serialize};

/// Terminal status of a transaction-log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogStatus {
    Committed,
    Failed,
    Prepared,
    PrepareFailed,
    Aborted,
}

/// One `transactions_log` row as the executor records it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub transaction_id: String,
    pub query_type: String,
    pub query_text: String,
    pub status: LogStatus,
    pub node_id: NodeId,
    pub created_at: DateTime<Utc>,
}

/// The database collaborator the core drives. Implementations front the
/// real engine and its connection pool; the core only depends on this
/// contract.
///
/// Logging contract: `execute` appends `COMMITTED` or `FAILED`; `prepare`
/// appends `PREPARED` or `PREPARE_FAILED`; `abort_prepared` appends
/// `ABORTED`. `commit_prepared` delegates to `execute`, so a committed
/// 2PC transaction leaves exactly one `COMMITTED` row per node.
pub trait QueryExecutor: Send + Sync + 'static {
    /// Run a statement and report the outcome (rows for reads,
    /// `affected_rows` for writes).
    fn execute(&self, sql: &str, transaction_id: &str) -> QueryOutcome;

    /// First 2PC phase: decide whether this node can commit the statement.
    /// Returns `(can_commit, error)`.
    fn prepare(&self, sql: &str, transaction_id: &str) -> (bool, Option<String>);

    /// Second 2PC phase: apply a previously prepared statement.
    fn commit_prepared(&self, sql: &str, transaction_id: &str) -> QueryOutcome;

    /// Discard a previously prepared statement.
    fn abort_prepared(&self, sql: &str, transaction_id: &str);

    /// Most recent log rows, newest first, optionally filtered by
    /// transaction.
    fn transaction_log(&self, transaction_id: Option<&str>, limit: usize) -> Vec<LogRecord>;
}
