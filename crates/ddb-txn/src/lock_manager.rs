use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use ddb_proto::LockMode;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tracing::{debug, warn};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

struct LockEntry {
    mode: LockMode,
    transaction_id: String,
    acquired_at: Instant,
}

#[derive(Default)]
struct LockTable {
    /// resource -> active locks, in grant order.
    locks: HashMap<String, Vec<LockEntry>>,
    /// transaction -> resources it holds locks on.
    by_txn: HashMap<String, HashSet<String>>,
}

impl LockTable {
    /// Grant predicate.
    ///
    /// Shared: grantable iff no other holder has Exclusive, or the
    /// transaction already holds the resource. Exclusive: grantable iff no
    /// other transaction holds any lock on the resource.
    fn can_acquire(&self, resource: &str, transaction_id: &str, mode: LockMode) -> bool {
        let Some(entries) = self.locks.get(resource) else {
            return true;
        };
        if entries.is_empty() {
            return true;
        }
        let holds_own = entries.iter().any(|l| l.transaction_id == transaction_id);
        match mode {
            LockMode::Shared => {
                holds_own || entries.iter().all(|l| l.mode == LockMode::Shared)
            }
            LockMode::Exclusive => {
                holds_own && entries.iter().all(|l| l.transaction_id == transaction_id)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// LockManager
// ---------------------------------------------------------------------------

/// Table-level shared/exclusive locks. Waiters block on a notification
/// signalled by every release; a deadline bounds the wait. Deadlock policy
/// is timeout-based: a failed acquire is the sole termination path, and
/// the caller aborts the transaction.
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Notify,
    default_timeout: Duration,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_timeout(default_timeout: Duration) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            released: Notify::new(),
            default_timeout,
        }
    }

    /// Block until the lock is grantable or the deadline expires. Returns
    /// false on timeout; a timeout of zero fails immediately on a
    /// contended resource.
    pub async fn acquire(
        &self,
        resource: &str,
        transaction_id: &str,
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> bool {
        let deadline = Instant::now() + timeout.unwrap_or(self.default_timeout);
        loop {
            // Register for release notifications BEFORE the grant check so
            // a release racing the check cannot be missed.
            let mut notified = std::pin::pin!(self.released.notified());
            notified.as_mut().enable();

            if self.try_acquire(resource, transaction_id, mode) {
                debug!("transaction {transaction_id} acquired {mode:?} lock on {resource}");
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "transaction {transaction_id} timed out waiting for {mode:?} lock on {resource}"
                );
                return false;
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }

    fn try_acquire(&self, resource: &str, transaction_id: &str, mode: LockMode) -> bool {
        let mut table = self.table.lock().expect("lock table poisoned");
        if !table.can_acquire(resource, transaction_id, mode) {
            return false;
        }
        table
            .locks
            .entry(resource.to_string())
            .or_default()
            .push(LockEntry {
                mode,
                transaction_id: transaction_id.to_string(),
                acquired_at: Instant::now(),
            });
        table
            .by_txn
            .entry(transaction_id.to_string())
            .or_default()
            .insert(resource.to_string());
        true
    }

    /// Remove every lock the transaction holds on the resource.
    pub fn release(&self, resource: &str, transaction_id: &str) -> bool {
        let released = {
            let mut table = self.table.lock().expect("lock table poisoned");
            let mut released = false;
            if let Some(entries) = table.locks.get_mut(resource) {
                let before = entries.len();
                entries.retain(|l| l.transaction_id != transaction_id);
                released = entries.len() < before;
                if entries.is_empty() {
                    table.locks.remove(resource);
                }
            }
            if let Some(resources) = table.by_txn.get_mut(transaction_id) {
                resources.remove(resource);
                if resources.is_empty() {
                    table.by_txn.remove(transaction_id);
                }
            }
            released
        };
        if released {
            debug!("transaction {transaction_id} released lock on {resource}");
            self.released.notify_waiters();
        }
        released
    }

    /// Release every lock the transaction owns.
    pub fn release_all(&self, transaction_id: &str) {
        let resources: Vec<String> = {
            let table = self.table.lock().expect("lock table poisoned");
            table
                .by_txn
                .get(transaction_id)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default()
        };
        for resource in resources {
            self.release(&resource, transaction_id);
        }
    }

    pub fn holds(&self, resource: &str, transaction_id: &str) -> bool {
        let table = self.table.lock().expect("lock table poisoned");
        table
            .locks
            .get(resource)
            .is_some_and(|entries| entries.iter().any(|l| l.transaction_id == transaction_id))
    }

    /// Current lock table as JSON, for status reporting.
    pub fn snapshot(&self) -> Value {
        let table = self.table.lock().expect("lock table poisoned");
        let resources: serde_json::Map<String, Value> = table
            .locks
            .iter()
            .map(|(resource, entries)| {
                let holders: Vec<Value> = entries
                    .iter()
                    .map(|l| {
                        json!({
                            "transaction_id": l.transaction_id,
                            "mode": match l.mode {
                                LockMode::Shared => "SHARED",
                                LockMode::Exclusive => "EXCLUSIVE",
                            },
                            "held_secs": l.acquired_at.elapsed().as_secs_f64(),
                        })
                    })
                    .collect();
                (resource.clone(), Value::Array(holders))
            })
            .collect();
        json!({
            "total_resources": table.locks.len(),
            "resources": resources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: Option<Duration> = Some(Duration::ZERO);

    #[tokio::test]
    async fn shared_locks_coexist() {
        let mgr = LockManager::new();
        assert!(mgr.acquire("t", "a", LockMode::Shared, T0).await);
        assert!(mgr.acquire("t", "b", LockMode::Shared, T0).await);
        assert!(mgr.holds("t", "a") && mgr.holds("t", "b"));
    }

    #[tokio::test]
    async fn exclusive_excludes_everyone_else() {
        let mgr = LockManager::new();
        assert!(mgr.acquire("t", "a", LockMode::Exclusive, T0).await);
        assert!(!mgr.acquire("t", "b", LockMode::Exclusive, T0).await);
        assert!(!mgr.acquire("t", "b", LockMode::Shared, T0).await);
    }

    #[tokio::test]
    async fn shared_blocks_foreign_exclusive() {
        let mgr = LockManager::new();
        assert!(mgr.acquire("t", "a", LockMode::Shared, T0).await);
        assert!(!mgr.acquire("t", "b", LockMode::Exclusive, T0).await);
    }

    #[tokio::test]
    async fn holder_may_stack_its_own_locks() {
        let mgr = LockManager::new();
        assert!(mgr.acquire("t", "a", LockMode::Shared, T0).await);
        // Sole holder may add an exclusive lock on its own resource.
        assert!(mgr.acquire("t", "a", LockMode::Exclusive, T0).await);
        // But not once another shared holder exists elsewhere on it.
        assert!(!mgr.acquire("t", "b", LockMode::Shared, T0).await);
    }

    #[tokio::test]
    async fn release_wakes_waiter() {
        let mgr = std::sync::Arc::new(LockManager::new());
        assert!(mgr.acquire("t", "a", LockMode::Exclusive, T0).await);

        let mgr2 = std::sync::Arc::clone(&mgr);
        let waiter = tokio::spawn(async move {
            mgr2.acquire("t", "b", LockMode::Exclusive, Some(Duration::from_secs(5)))
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        mgr.release("t", "a");
        assert!(waiter.await.unwrap(), "waiter should get the lock after release");
    }

    #[tokio::test]
    async fn release_all_frees_every_resource() {
        let mgr = LockManager::new();
        assert!(mgr.acquire("t1", "a", LockMode::Exclusive, T0).await);
        assert!(mgr.acquire("t2", "a", LockMode::Exclusive, T0).await);
        mgr.release_all("a");
        assert!(!mgr.holds("t1", "a"));
        assert!(!mgr.holds("t2", "a"));
        assert!(mgr.acquire("t1", "b", LockMode::Exclusive, T0).await);
        assert!(mgr.acquire("t2", "b", LockMode::Exclusive, T0).await);
    }

    #[tokio::test]
    async fn release_of_unheld_resource_is_false() {
        let mgr = LockManager::new();
        assert!(!mgr.release("t", "ghost"));
    }
}
