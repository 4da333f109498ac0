//! ddb-node entry point.
//!
//! Thin by design: parse flags, set up tracing, build the immutable
//! config and the node, serve until ctrl-c, then shut down in order.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ddb_config::ClusterConfig;
use ddb_exec::MemoryExecutor;
use ddb_net::Bound;
use ddb_node::{cluster_peers, Node, NodeSettings};
use tracing::info;

#[derive(Parser)]
#[command(name = "ddb-node")]
#[command(about = "Distributed database middleware node", long_about = None)]
struct Cli {
    /// This node's id in the cluster config
    #[arg(long)]
    node_id: u64,

    /// Configuration directory path
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    /// Nodes configuration file name. Use nodes.local.json for physical
    /// machine deployments.
    #[arg(long, default_value = "nodes.json")]
    nodes_config: String,

    /// Shortcut for --nodes-config=nodes.local.json
    #[arg(long)]
    local: bool,

    /// Read load-balancing strategy (round_robin | least_loaded)
    #[arg(long, default_value = "round_robin")]
    lb_strategy: String,

    /// Default log filter when RUST_LOG is unset (error|warn|info|debug|trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let nodes_file = if cli.local {
        "nodes.local.json"
    } else {
        cli.nodes_config.as_str()
    };

    let config = ClusterConfig::load(&cli.config_dir, nodes_file)?;
    let endpoint = config.local_node(cli.node_id)?;

    info!(
        "starting node {} ({}:{}, database {}@{}:{})",
        cli.node_id,
        endpoint.ip,
        endpoint.port,
        endpoint.mysql_database,
        endpoint.mysql_host,
        endpoint.mysql_port
    );

    let mut settings = NodeSettings::from_cluster(&config);
    settings.strategy = cli.lb_strategy.parse().map_err(anyhow::Error::msg)?;

    let executor = Arc::new(MemoryExecutor::new(cli.node_id));
    let node = Node::new(cli.node_id, cluster_peers(&config), executor, settings)?;

    let bound = Bound::bind(("0.0.0.0", endpoint.port))
        .await
        .with_context(|| format!("bind port {}", endpoint.port))?;
    let runtime = node.start(bound)?;

    info!("node {} is running; press ctrl-c to stop", cli.node_id);
    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;

    info!("received shutdown signal, stopping node {}", cli.node_id);
    runtime.shutdown().await;
    Ok(())
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .init();
}
