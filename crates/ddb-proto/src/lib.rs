//! Wire protocol for the middleware cluster.
//!
//! Every message that crosses a node boundary is a single JSON envelope
//! carrying a typed payload, preceded on the wire by a `u32` big-endian
//! length prefix. The envelope is checksummed with SHA-256 over its
//! canonical (recursively key-sorted) JSON form, excluding the `checksum`
//! field itself; receivers MUST verify before dispatching.

mod checksum;
mod frame;
mod ids;
mod message;

pub use checksum::{canonical_json, checksum_of, sort_keys};
pub use frame::{decode, encode, frame_len, WireError, MAX_FRAME_BYTES};
pub use ids::{generate_message_id, generate_transaction_id};
pub use message::{
    ClusterHealth, LockMode, Message, NodeId, NodeStatusReport, Payload, QueryOutcome,
};
