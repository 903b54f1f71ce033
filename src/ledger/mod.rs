// src/ledger/mod.rs
pub mod block;
pub mod canonical;
pub mod chain;
pub mod contract;

pub use block::Block;
pub use chain::{
    verify_blocks, Blockchain, ChainEvent, ChainSnapshot, SnapshotMetadata, TransactionReceipt,
    TxLocation,
};
pub use contract::{ChainStatistics, ContractState, UserRole, UserTransaction};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which check a block failed during full-chain verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityFault {
    #[error("chain is empty")]
    Empty,
    #[error("genesis block is malformed")]
    Genesis,
    #[error("index does not match position")]
    IndexMismatch,
    #[error("previous hash does not link to predecessor")]
    BrokenLink,
    #[error("stored hash does not match recomputed hash")]
    HashMismatch,
    #[error("stored merkle root does not match payload")]
    MerkleRootMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("block {index}: {fault}")]
pub struct IntegrityFailure {
    pub index: u64,
    pub fault: IntegrityFault,
}

/// Current wall clock as unix millis.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
