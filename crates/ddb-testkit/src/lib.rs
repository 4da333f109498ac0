//! Test harness for driving real multi-node clusters on loopback TCP.
//!
//! Scenario tests live under `tests/`; this crate only provides the
//! plumbing to start clusters with shortened timings, issue client
//! queries, and stop individual nodes mid-test.

mod cluster;

pub use cluster::{
    fast_settings, start_cluster, unwrap_outcome, TestCluster, TestNode, TEST_CLIENT_ID,
};
