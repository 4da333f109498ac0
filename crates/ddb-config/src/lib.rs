//! Boundary configuration: the static node set and heartbeat settings.
//!
//! Configuration is an immutable value built once at startup and passed
//! into the node by value. The `nodes.json` format is external contract:
//!
//! ```json
//! {
//!   "nodes": [
//!     {"id": 1, "ip": "10.0.0.1", "port": 5001,
//!      "mysql_host": "10.0.0.1", "mysql_port": 3306, "mysql_database": "app"}
//!   ],
//!   "heartbeat_interval": 5,
//!   "heartbeat_timeout": 15
//! }
//! ```
//!
//! `CLUSTER_NODES` (a JSON document in the same shape) overrides the file
//! entirely; `NODE_IP`, `NODE_PORT`, and `NODE_MYSQL_*` override fields of
//! the local node. `.env.local` is loaded when present, for dev setups.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// One cluster member as configured, including the database endpoint its
/// executor fronts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEndpoint {
    pub id: u64,
    pub ip: String,
    pub port: u16,
    pub mysql_host: String,
    pub mysql_port: u16,
    pub mysql_database: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub nodes: Vec<NodeEndpoint>,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout: u64,
}

fn default_heartbeat_interval() -> u64 {
    5
}

fn default_heartbeat_timeout() -> u64 {
    15
}

impl ClusterConfig {
    /// Load from `CLUSTER_NODES` when set, else from
    /// `<config_dir>/<nodes_file>`.
    pub fn load(config_dir: &Path, nodes_file: &str) -> Result<Self> {
        // Silent when absent; production injects env vars directly.
        let _ = dotenvy::from_filename(".env.local");

        let config: ClusterConfig = match std::env::var("CLUSTER_NODES") {
            Ok(raw) => {
                info!("loading cluster config from CLUSTER_NODES");
                serde_json::from_str(&raw).context("parse CLUSTER_NODES")?
            }
            Err(_) => {
                let path = config_dir.join(nodes_file);
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("read config: {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parse config: {}", path.display()))?
            }
        };

        if config.nodes.is_empty() {
            bail!("cluster config contains no nodes");
        }
        Ok(config)
    }

    pub fn node(&self, id: u64) -> Option<&NodeEndpoint> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The local node's endpoint with per-node env overrides applied.
    pub fn local_node(&self, id: u64) -> Result<NodeEndpoint> {
        let mut node = self
            .node(id)
            .cloned()
            .with_context(|| format!("configuration not found for node {id}"))?;

        if let Ok(ip) = std::env::var("NODE_IP") {
            node.ip = ip;
        }
        if let Ok(port) = std::env::var("NODE_PORT") {
            node.port = port.parse().context("parse NODE_PORT")?;
        }
        if let Ok(host) = std::env::var("NODE_MYSQL_HOST") {
            node.mysql_host = host;
        }
        if let Ok(port) = std::env::var("NODE_MYSQL_PORT") {
            node.mysql_port = port.parse().context("parse NODE_MYSQL_PORT")?;
        }
        if let Ok(db) = std::env::var("NODE_MYSQL_DATABASE") {
            node.mysql_database = db;
        }
        Ok(node)
    }

    /// Every configured node except `id`.
    pub fn peers_of(&self, id: u64) -> Vec<NodeEndpoint> {
        self.nodes.iter().filter(|n| n.id != id).cloned().collect()
    }

    /// Boot-time coordinator: the maximum configured node id.
    pub fn max_node_id(&self) -> u64 {
        self.nodes.iter().map(|n| n.id).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_json() -> &'static str {
        r#"{
            "nodes": [
                {"id": 1, "ip": "127.0.0.1", "port": 5001,
                 "mysql_host": "127.0.0.1", "mysql_port": 3306, "mysql_database": "app"},
                {"id": 3, "ip": "127.0.0.1", "port": 5003,
                 "mysql_host": "127.0.0.1", "mysql_port": 3306, "mysql_database": "app"}
            ],
            "heartbeat_interval": 2,
            "heartbeat_timeout": 6
        }"#
    }

    #[test]
    fn loads_nodes_file_with_heartbeat_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_json().as_bytes()).unwrap();

        let cfg = ClusterConfig::load(dir.path(), "nodes.json").unwrap();
        assert_eq!(cfg.nodes.len(), 2);
        assert_eq!(cfg.heartbeat_interval, 2);
        assert_eq!(cfg.heartbeat_timeout, 6);
        assert_eq!(cfg.max_node_id(), 3);
        assert_eq!(cfg.peers_of(1).len(), 1);
        assert_eq!(cfg.node(3).unwrap().port, 5003);
        assert!(cfg.node(2).is_none());
    }

    #[test]
    fn heartbeat_settings_default_when_absent() {
        let raw = r#"{"nodes": [
            {"id": 1, "ip": "127.0.0.1", "port": 5001,
             "mysql_host": "127.0.0.1", "mysql_port": 3306, "mysql_database": "app"}
        ]}"#;
        let cfg: ClusterConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.heartbeat_interval, 5);
        assert_eq!(cfg.heartbeat_timeout, 15);
    }

    #[test]
    fn empty_node_set_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");
        std::fs::write(&path, r#"{"nodes": []}"#).unwrap();
        assert!(ClusterConfig::load(dir.path(), "nodes.json").is_err());
    }
}
