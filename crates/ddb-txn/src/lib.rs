//! Transaction machinery: table-level locks, the per-node transaction
//! registry, and the two-phase commit protocol.

mod lock_manager;
mod registry;
mod two_phase;

pub use lock_manager::{LockManager, DEFAULT_LOCK_TIMEOUT};
pub use registry::{TransactionRegistry, TxnState};
pub use two_phase::{CommitCoordinator, CommitParticipant, TwoPhaseOutcome, WRITE_LOCK_RESOURCE};

pub use ddb_proto::LockMode;
