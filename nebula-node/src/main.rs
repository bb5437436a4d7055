//! NebulaStore Node Daemon
//!
//! Runs a storage node that:
//! - Stores dataset blocks locally using RocksDB
//! - Builds Merkle trees and manifests for uploaded datasets
//! - Serves retrievals from the local repository

use clap::Parser;
use nebula_node::{NebulaNode, NodeConfig};
use std::path::PathBuf;
use tracing::{error, info};

/// Upper bound on configured runtime worker threads.
const MAX_WORKER_THREADS: usize = 16;

#[derive(Parser)]
#[command(name = "nebula-node")]
#[command(about = "NebulaStore storage node daemon")]
#[command(version)]
struct Cli {
    /// Configuration file path (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory (overrides config file)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Storage quota in bytes (overrides config file)
    #[arg(short, long)]
    quota: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(quota) = cli.quota {
        config.storage_quota = quota;
    }

    // Initialize tracing
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        config.tracing_level()
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Build the runtime, honoring num-threads when configured
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if config.num_threads > 0 {
        builder.worker_threads(config.num_threads.min(MAX_WORKER_THREADS));
    }
    let runtime = builder.build()?;
    runtime.block_on(run(config))
}

async fn run(config: NodeConfig) -> anyhow::Result<()> {
    info!("NebulaStore node starting...");
    info!(
        data_dir = ?config.data_dir,
        storage_quota = config.storage_quota,
        block_ttl = config.block_ttl,
        "Configuration loaded"
    );

    let node = match NebulaNode::new(config) {
        Ok(node) => node,
        Err(e) => {
            error!(error = %e, "Node creation failed");
            return Err(anyhow::anyhow!("node creation failed: {}", e));
        }
    };
    node.start()?;

    info!("========================================");
    info!("  NebulaStore Node Running");
    info!("========================================");
    info!("  Peer ID:   {}", node.peer_id());
    info!("  Data dir:  {}", node.repo());
    info!("========================================");
    info!("Press Ctrl+C to shut down");

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    node.stop()?;
    node.close().await?;
    info!("NebulaStore node stopped");
    Ok(())
}
