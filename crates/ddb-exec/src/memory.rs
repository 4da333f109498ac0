use std::sync::Mutex;

use chrono::Utc;
use ddb_proto::{NodeId, QueryOutcome};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::executor::{LogRecord, LogStatus, QueryExecutor};
use crate::query::QueryKind;

/// In-memory [`QueryExecutor`]. Writes append synthetic rows; reads return
/// the accumulated rows. Failure injection hooks let tests force NO votes
/// and execution errors without a real database.
pub struct MemoryExecutor {
    node_id: NodeId,
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    rows: Vec<Value>,
    log: Vec<LogRecord>,
    reject_prepare: Vec<String>,
    fail_execute: Vec<String>,
}

impl MemoryExecutor {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Any statement containing `pattern` will vote NO at prepare time.
    pub fn reject_prepare_containing(&self, pattern: impl Into<String>) {
        self.state
            .lock()
            .expect("executor state poisoned")
            .reject_prepare
            .push(pattern.into());
    }

    /// Any statement containing `pattern` will fail at execute time.
    pub fn fail_execute_containing(&self, pattern: impl Into<String>) {
        self.state
            .lock()
            .expect("executor state poisoned")
            .fail_execute
            .push(pattern.into());
    }

    /// Rows applied by write statements, in application order.
    pub fn applied(&self) -> Vec<Value> {
        self.state
            .lock()
            .expect("executor state poisoned")
            .rows
            .clone()
    }

    pub fn applied_count(&self) -> usize {
        self.state.lock().expect("executor state poisoned").rows.len()
    }

    fn append_log(state: &mut MemoryState, node_id: NodeId, txn: &str, sql: &str, status: LogStatus) {
        state.log.push(LogRecord {
            transaction_id: txn.to_string(),
            query_type: QueryKind::classify(sql).as_str().to_string(),
            query_text: sql.to_string(),
            status,
            node_id,
            created_at: Utc::now(),
        });
    }
}

impl QueryExecutor for MemoryExecutor {
    fn execute(&self, sql: &str, transaction_id: &str) -> QueryOutcome {
        let kind = QueryKind::classify(sql);
        let mut state = self.state.lock().expect("executor state poisoned");

        let mut outcome = QueryOutcome {
            success: true,
            transaction_id: Some(transaction_id.to_string()),
            node_id: Some(self.node_id),
            query_type: Some(kind.as_str().to_string()),
            timestamp: Some(Utc::now()),
            ..Default::default()
        };

        if let Some(pat) = state
            .fail_execute
            .iter()
            .find(|p| sql.contains(p.as_str()))
            .cloned()
        {
            warn!("execute failed for {transaction_id}: statement matches '{pat}'");
            outcome.success = false;
            outcome.error = Some(format!("execution rejected: statement matches '{pat}'"));
            Self::append_log(&mut state, self.node_id, transaction_id, sql, LogStatus::Failed);
            return outcome;
        }

        if kind.is_read() {
            let rows = state.rows.clone();
            outcome.row_count = Some(rows.len());
            outcome.data = Some(rows);
        } else {
            state.rows.push(json!({
                "statement": sql,
                "transaction_id": transaction_id,
            }));
            outcome.affected_rows = Some(1);
        }

        info!("executed {} query for {transaction_id}", kind.as_str());
        Self::append_log(&mut state, self.node_id, transaction_id, sql, LogStatus::Committed);
        outcome
    }

    fn prepare(&self, sql: &str, transaction_id: &str) -> (bool, Option<String>) {
        let mut state = self.state.lock().expect("executor state poisoned");

        if let Some(pat) = state
            .reject_prepare
            .iter()
            .find(|p| sql.contains(p.as_str()))
            .cloned()
        {
            warn!("prepare refused for {transaction_id}: statement matches '{pat}'");
            Self::append_log(
                &mut state,
                self.node_id,
                transaction_id,
                sql,
                LogStatus::PrepareFailed,
            );
            return (false, Some(format!("cannot prepare: statement matches '{pat}'")));
        }

        Self::append_log(&mut state, self.node_id, transaction_id, sql, LogStatus::Prepared);
        (true, None)
    }

    fn commit_prepared(&self, sql: &str, transaction_id: &str) -> QueryOutcome {
        info!("committing prepared statement for {transaction_id}");
        self.execute(sql, transaction_id)
    }

    fn abort_prepared(&self, sql: &str, transaction_id: &str) {
        info!("aborting prepared statement for {transaction_id}");
        let mut state = self.state.lock().expect("executor state poisoned");
        Self::append_log(&mut state, self.node_id, transaction_id, sql, LogStatus::Aborted);
    }

    fn transaction_log(&self, transaction_id: Option<&str>, limit: usize) -> Vec<LogRecord> {
        let state = self.state.lock().expect("executor state poisoned");
        state
            .log
            .iter()
            .rev()
            .filter(|r| transaction_id.map_or(true, |t| r.transaction_id == t))
            .take(limit)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrip() {
        let exec = MemoryExecutor::new(1);
        let w = exec.execute("INSERT INTO t VALUES (1,'x')", "TXN-a");
        assert!(w.success);
        assert_eq!(w.affected_rows, Some(1));

        let r = exec.execute("SELECT * FROM t", "TXN-b");
        assert!(r.success);
        assert_eq!(r.row_count, Some(1));
        assert_eq!(exec.applied_count(), 1);
    }

    #[test]
    fn prepare_commit_logs_one_committed_row() {
        let exec = MemoryExecutor::new(1);
        let (ok, err) = exec.prepare("UPDATE t SET x=1", "TXN-a");
        assert!(ok);
        assert!(err.is_none());

        exec.commit_prepared("UPDATE t SET x=1", "TXN-a");

        let log = exec.transaction_log(Some("TXN-a"), 10);
        let statuses: Vec<_> = log.iter().map(|r| r.status).collect();
        // Newest first.
        assert_eq!(statuses, vec![LogStatus::Committed, LogStatus::Prepared]);
    }

    #[test]
    fn injected_prepare_rejection_votes_no() {
        let exec = MemoryExecutor::new(2);
        exec.reject_prepare_containing("users");
        let (ok, err) = exec.prepare("INSERT INTO users VALUES (1)", "TXN-a");
        assert!(!ok);
        assert!(err.unwrap().contains("users"));
        assert_eq!(
            exec.transaction_log(Some("TXN-a"), 1)[0].status,
            LogStatus::PrepareFailed
        );
    }

    #[test]
    fn injected_execute_failure_logs_failed() {
        let exec = MemoryExecutor::new(2);
        exec.fail_execute_containing("orders");
        let out = exec.execute("DELETE FROM orders", "TXN-a");
        assert!(!out.success);
        assert_eq!(exec.applied_count(), 0);
        assert_eq!(
            exec.transaction_log(Some("TXN-a"), 1)[0].status,
            LogStatus::Failed
        );
    }

    #[test]
    fn abort_prepared_logs_aborted() {
        let exec = MemoryExecutor::new(3);
        exec.prepare("INSERT INTO t VALUES (2)", "TXN-z");
        exec.abort_prepared("INSERT INTO t VALUES (2)", "TXN-z");
        assert_eq!(
            exec.transaction_log(Some("TXN-z"), 1)[0].status,
            LogStatus::Aborted
        );
        assert_eq!(exec.applied_count(), 0);
    }
}
