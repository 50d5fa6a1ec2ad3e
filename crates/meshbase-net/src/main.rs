#![warn(missing_docs)]

//! mesh-node: runs a small in-process replication network and replicates
//! the home object of every peer into the first node.

use anyhow::Result;
use clap::Parser;
use meshbase_core::{InMemoryModelBase, MeshBaseIdentifier, ModelBase};
use meshbase_net::{LocalNetwork, NetMeshBaseConfig, NetMeshObjectAccessSpecification};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "mesh-node")]
#[command(about = "meshbase replication node", long_about = None)]
struct Cli {
    /// Configuration file (.toml or .json).
    #[arg(short, long, env = "MESH_NODE_CONFIG")]
    config: Option<PathBuf>,

    /// Identifier of the first node.
    #[arg(short, long, default_value = "node0")]
    identifier: String,

    /// Number of peer nodes.
    #[arg(short, long, default_value = "2")]
    peers: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) if path.exists() => NetMeshBaseConfig::from_file(path)?,
        Some(path) => {
            tracing::warn!("Config file not found, using defaults: {}", path.display());
            NetMeshBaseConfig::default()
        }
        None => NetMeshBaseConfig::default(),
    };

    let model: Arc<dyn ModelBase> = Arc::new(InMemoryModelBase::new());
    let network = LocalNetwork::new();
    let node = network.create_node(MeshBaseIdentifier::new(cli.identifier.clone()), model.clone(), config.clone());
    let peers: Vec<_> = (1..=cli.peers)
        .map(|i| {
            network.create_node(
                MeshBaseIdentifier::new(format!("{}-peer{}", cli.identifier, i)),
                model.clone(),
                config.clone(),
            )
        })
        .collect();
    tracing::info!("mesh-node {} starting with {} peer(s)", node.identifier(), peers.len());

    let paths: Vec<NetMeshObjectAccessSpecification> = peers
        .iter()
        .map(|p| NetMeshObjectAccessSpecification::home_of(p.identifier().clone()))
        .collect();

    match node.access_locally(&paths).await {
        Ok(replicas) => {
            for replica in replicas.iter().flatten() {
                tracing::info!(
                    "Replicated {} (home replica: {}, lock held: {})",
                    replica.identifier(),
                    replica.is_home_replica(),
                    replica.has_lock()
                );
            }
        }
        Err(e) => tracing::error!("Replication incomplete: {}", e),
    }

    let stats = network.stats();
    tracing::info!(
        "Network: {} fetch(es), {} rights request(s), {} update(s), {} failure(s)",
        stats.replicas_requested,
        stats.rights_requested,
        stats.updates_sent,
        stats.failures
    );

    for peer in &peers {
        peer.die();
    }
    node.die();
    Ok(())
}
