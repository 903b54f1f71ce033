// src/coordinator/handle.rs
use anyhow::{anyhow, Result};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use super::{Command, NodeNetworkStats, NodeOp};
use crate::ledger::{
    Block, ChainSnapshot, ChainStatistics, ContractState, IntegrityFailure, TransactionReceipt,
    UserRole, UserTransaction,
};
use crate::registry::{NodeId, NodeRecord, NodeRegistration, NodeStatus, RegistryError};

/// Cloneable API onto a running `Coordinator`. Every call is a command plus a oneshot reply.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    pub(crate) fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| anyhow!("coordinator is not running"))?;
        rx.await
            .map_err(|_| anyhow!("coordinator dropped the request"))
    }

    /// Seal `data` as a new block. Chain errors come back as `ChainError` inside the anyhow error.
    pub async fn submit(&self, data: Value) -> Result<Block> {
        Ok(self.call(|reply| Command::Submit { data, reply }).await??)
    }

    pub async fn lookup(&self, transaction_id: &str) -> Result<Option<TransactionReceipt>> {
        let transaction_id = transaction_id.to_string();
        self.call(|reply| Command::Lookup {
            transaction_id,
            reply,
        })
        .await
    }

    pub async fn aggregate(&self, contract_id: &str) -> Result<ContractState> {
        let contract_id = contract_id.to_string();
        self.call(|reply| Command::Aggregate { contract_id, reply })
            .await
    }

    pub async fn export_chain(&self) -> Result<ChainSnapshot> {
        self.call(|reply| Command::ExportChain { reply }).await
    }

    pub async fn statistics(&self) -> Result<ChainStatistics> {
        self.call(|reply| Command::Statistics { reply }).await
    }

    pub async fn user_transactions(&self, user_id: &str, role: UserRole) -> Result<Vec<UserTransaction>> {
        let user_id = user_id.to_string();
        self.call(|reply| Command::UserTransactions {
            user_id,
            role,
            reply,
        })
        .await
    }

    pub async fn validity(&self) -> Result<std::result::Result<(), IntegrityFailure>> {
        self.call(|reply| Command::Validity { reply }).await
    }

    pub async fn network_stats(&self) -> Result<NodeNetworkStats> {
        self.call(|reply| Command::NetworkStats { reply }).await
    }

    pub async fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        self.call(|reply| Command::ListNodes { reply }).await
    }

    pub async fn register_node(&self, registration: NodeRegistration) -> Result<NodeStatus> {
        Ok(self
            .call(|reply| Command::RegisterNode {
                registration,
                reply,
            })
            .await??)
    }

    async fn node_admin(&self, op: NodeOp, node_id: &str) -> Result<()> {
        let node_id = node_id.to_string();
        let result: std::result::Result<(), RegistryError> = self
            .call(|reply| Command::NodeAdmin { op, node_id, reply })
            .await?;
        Ok(result?)
    }

    pub async fn approve_node(&self, node_id: &str) -> Result<()> {
        self.node_admin(NodeOp::Approve, node_id).await
    }

    pub async fn reject_node(&self, node_id: &str, reason: &str) -> Result<()> {
        self.node_admin(
            NodeOp::Reject {
                reason: reason.to_string(),
            },
            node_id,
        )
        .await
    }

    pub async fn promote_node(&self, node_id: &str) -> Result<()> {
        self.node_admin(NodeOp::Promote, node_id).await
    }

    pub async fn demote_node(&self, node_id: &str) -> Result<()> {
        self.node_admin(NodeOp::Demote, node_id).await
    }

    pub async fn remove_node(&self, node_id: &str, reason: &str) -> Result<()> {
        self.node_admin(
            NodeOp::Remove {
                reason: reason.to_string(),
            },
            node_id,
        )
        .await
    }

    /// Dial a peer. Once the handshake completes the node asks it for its chain.
    pub async fn connect_peer(&self, address: &str, expected_id: Option<&str>) -> Result<NodeId> {
        let address = address.to_string();
        let expected_id = expected_id.map(str::to_string);
        self.call(|reply| Command::ConnectPeer {
            address,
            expected_id,
            reply,
        })
        .await?
    }

    /// Broadcast CHAIN_REQUEST; returns how many peers it went to.
    pub async fn request_sync(&self) -> Result<usize> {
        self.call(|reply| Command::RequestSync { reply }).await
    }

    pub async fn force_save(&self) -> Result<()> {
        self.call(|reply| Command::ForceSave { reply }).await
    }

    /// Persist, close peers and stop the event loop. Resolves once shutdown has finished.
    pub async fn shutdown(&self) -> Result<()> {
        self.call(|reply| Command::Shutdown { reply }).await
    }
}
