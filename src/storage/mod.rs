// src/storage/mod.rs
// Persistence contract shared by the local and remote backends.

pub mod memory;
pub mod remote;
pub mod rocks;

pub use memory::MemoryStore;
pub use remote::HttpKvStore;
pub use rocks::RocksStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::ledger::ChainSnapshot;
use crate::registry::RegistryExport;

pub const CHAIN_KEY: &str = "blockchain";
pub const NODES_KEY: &str = "nodes";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A durable home for the chain snapshot and the registry export.
/// `load_*` returns `Ok(None)` when nothing has been stored yet.
#[async_trait]
pub trait ChainStore: Send + Sync {
    fn name(&self) -> &str;

    async fn save_blockchain(&self, snapshot: &ChainSnapshot) -> Result<(), StorageError>;

    async fn load_blockchain(&self) -> Result<Option<ChainSnapshot>, StorageError>;

    async fn save_nodes(&self, nodes: &RegistryExport) -> Result<(), StorageError>;

    async fn load_nodes(&self) -> Result<Option<RegistryExport>, StorageError>;
}
