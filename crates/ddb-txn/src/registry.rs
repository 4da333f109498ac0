use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ddb_proto::{generate_transaction_id, NodeId};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::lock_manager::LockManager;

/// Lifecycle of one transaction on one node.
///
/// `Active → Preparing → Prepared → (Committing → Committed)
///                                | (Aborting → Aborted)`
///
/// Terminal transitions release every lock the transaction owns and drop
/// the record; the registry is not persistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Preparing,
    Prepared,
    Committing,
    Committed,
    Aborting,
    Aborted,
}

impl TxnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TxnState::Committed | TxnState::Aborted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TxnState::Active => "ACTIVE",
            TxnState::Preparing => "PREPARING",
            TxnState::Prepared => "PREPARED",
            TxnState::Committing => "COMMITTING",
            TxnState::Committed => "COMMITTED",
            TxnState::Aborting => "ABORTING",
            TxnState::Aborted => "ABORTED",
        }
    }
}

struct TxnRecord {
    state: TxnState,
    queries: Vec<String>,
}

// ---------------------------------------------------------------------------
// TransactionRegistry
// ---------------------------------------------------------------------------

pub struct TransactionRegistry {
    node_id: NodeId,
    locks: Arc<LockManager>,
    txns: Mutex<HashMap<String, TxnRecord>>,
}

impl TransactionRegistry {
    pub fn new(node_id: NodeId, locks: Arc<LockManager>) -> Self {
        Self {
            node_id,
            locks,
            txns: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Create an `Active` record. Reusing an existing id is a no-op.
    pub fn begin(&self, transaction_id: Option<&str>) -> String {
        let id = transaction_id
            .map(str::to_string)
            .unwrap_or_else(generate_transaction_id);

        let mut txns = self.txns.lock().expect("registry poisoned");
        if txns.contains_key(&id) {
            warn!("transaction {id} already exists on node {}", self.node_id);
            return id;
        }
        txns.insert(
            id.clone(),
            TxnRecord {
                state: TxnState::Active,
                queries: Vec::new(),
            },
        );
        info!("started transaction {id}");
        id
    }

    /// Record a statement against an active transaction.
    pub fn add_query(&self, transaction_id: &str, sql: &str) -> bool {
        let mut txns = self.txns.lock().expect("registry poisoned");
        match txns.get_mut(transaction_id) {
            Some(rec) if rec.state == TxnState::Active => {
                rec.queries.push(sql.to_string());
                true
            }
            Some(rec) => {
                warn!(
                    "cannot add query to transaction {transaction_id} in state {}",
                    rec.state.as_str()
                );
                false
            }
            None => {
                warn!("transaction {transaction_id} not found");
                false
            }
        }
    }

    /// `Active → Preparing → Prepared`. Returns false (reverting to
    /// `Active` where applicable) if the transaction is unknown or
    /// terminal. Already-prepared transactions return true.
    pub fn prepare(&self, transaction_id: &str) -> bool {
        let mut txns = self.txns.lock().expect("registry poisoned");
        let Some(rec) = txns.get_mut(transaction_id) else {
            warn!("cannot prepare unknown transaction {transaction_id}");
            return false;
        };
        match rec.state {
            TxnState::Active | TxnState::Preparing => {
                rec.state = TxnState::Preparing;
                rec.state = TxnState::Prepared;
                info!("transaction {transaction_id} prepared");
                true
            }
            TxnState::Prepared => true,
            other => {
                warn!(
                    "cannot prepare transaction {transaction_id} in state {}",
                    other.as_str()
                );
                false
            }
        }
    }

    /// `Prepared|Active → Committing → Committed`, then release all owned
    /// locks and drop the record.
    pub fn commit(&self, transaction_id: &str) -> bool {
        let mut txns = self.txns.lock().expect("registry poisoned");
        let Some(rec) = txns.get_mut(transaction_id) else {
            warn!("cannot commit unknown transaction {transaction_id}");
            return false;
        };
        if rec.state.is_terminal() {
            warn!(
                "cannot commit transaction {transaction_id} in state {}",
                rec.state.as_str()
            );
            return false;
        }
        rec.state = TxnState::Committing;
        rec.state = TxnState::Committed;
        self.locks.release_all(transaction_id);
        txns.remove(transaction_id);
        info!("transaction {transaction_id} committed");
        true
    }

    /// Any non-terminal state → `Aborting → Aborted`, release all owned
    /// locks, drop the record. Unknown transactions are a logged no-op.
    pub fn abort(&self, transaction_id: &str) -> bool {
        let mut txns = self.txns.lock().expect("registry poisoned");
        let Some(rec) = txns.get_mut(transaction_id) else {
            warn!("cannot abort unknown transaction {transaction_id}");
            return false;
        };
        if rec.state.is_terminal() {
            return false;
        }
        rec.state = TxnState::Aborting;
        rec.state = TxnState::Aborted;
        self.locks.release_all(transaction_id);
        txns.remove(transaction_id);
        info!("transaction {transaction_id} aborted");
        true
    }

    /// Protocol alias for [`TransactionRegistry::abort`].
    pub fn rollback(&self, transaction_id: &str) -> bool {
        self.abort(transaction_id)
    }

    pub fn state_of(&self, transaction_id: &str) -> Option<TxnState> {
        let txns = self.txns.lock().expect("registry poisoned");
        txns.get(transaction_id).map(|r| r.state)
    }

    pub fn active_count(&self) -> usize {
        self.txns.lock().expect("registry poisoned").len()
    }

    /// Open transactions as JSON, for status reporting.
    pub fn summary(&self) -> Value {
        let txns = self.txns.lock().expect("registry poisoned");
        let entries: serde_json::Map<String, Value> = txns
            .iter()
            .map(|(id, rec)| {
                (
                    id.clone(),
                    json!({
                        "state": rec.state.as_str(),
                        "query_count": rec.queries.len(),
                    }),
                )
            })
            .collect();
        json!({
            "count": txns.len(),
            "transactions": entries,
        })
    }
}
