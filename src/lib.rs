// src/lib.rs
pub mod config;
pub mod consensus;
pub mod coordinator;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod network;
pub mod registry;
pub mod storage;

use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{BootstrapPeer, NodeConfig};
use crate::coordinator::Coordinator;
use crate::storage::{ChainStore, HttpKvStore, RocksStore};

#[derive(Parser, Debug)]
#[command(name = "agri-node", author, version, about = "Permissioned agricultural ledger node", long_about = None)]
struct Cli {
    /// P2P listen address (overrides P2P_LISTEN_ADDR)
    #[arg(long)]
    listen: Option<String>,
    /// Data directory for the local store (overrides DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Node id (overrides NODE_ID)
    #[arg(long)]
    node_id: Option<String>,
    /// Extra bootstrap peer, `host:port` or `host:port@nodeId`; repeatable
    #[arg(long = "peer")]
    peers: Vec<String>,
}

impl Cli {
    fn apply(self, config: &mut NodeConfig) -> anyhow::Result<()> {
        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(id) = self.node_id {
            config.node_id = id;
        }
        for peer in self.peers {
            let parsed: BootstrapPeer = peer
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .with_context(|| format!("--peer {}", peer))?;
            config.bootstrap_peers.push(parsed);
        }
        Ok(())
    }
}

/// Local RocksDB store, plus the remote store when one is configured.
pub fn stores_from_config(config: &NodeConfig) -> anyhow::Result<Vec<Arc<dyn ChainStore>>> {
    let mut stores: Vec<Arc<dyn ChainStore>> = Vec::new();
    let db_path = config.data_dir.join("chain-db");
    let local = RocksStore::open(&db_path)
        .with_context(|| format!("opening local store at {}", db_path.display()))?;
    stores.push(Arc::new(local));
    if let Some(url) = &config.remote_store_url {
        stores.push(Arc::new(HttpKvStore::new(url.clone())?));
    }
    Ok(stores)
}

/// Entry point of the `agri-node` binary.
pub async fn run() -> anyhow::Result<()> {
    // load .env for local development (if present)
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = NodeConfig::from_env();
    cli.apply(&mut config)?;

    let validation = config.validate();
    validation.log();
    if !validation.is_valid() {
        bail!("invalid configuration ({} error(s))", validation.error_count());
    }

    let stores = stores_from_config(&config)?;
    let mut coordinator = Coordinator::new(config, stores)?;
    coordinator.bootstrap().await?;
    let handle = coordinator.handle();
    let node = tokio::spawn(coordinator.run());

    tracing::info!("node running, press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    tracing::info!("shutdown signal received");
    handle.shutdown().await?;
    node.await??;
    Ok(())
}
