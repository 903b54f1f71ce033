// src/coordinator/mod.rs
// Single owner of the chain, the registry and the consensus engine. Every
// mutation happens on the task running `Coordinator::run`.

mod handle;

pub use handle::CoordinatorHandle;

use anyhow::{anyhow, Result};
use ed25519_dalek::SigningKey;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Interval, MissedTickBehavior};

use crate::config::NodeConfig;
use crate::consensus::{ConflictResolution, ConsensusStats, ProofOfAuthority, Severity};
use crate::crypto::keys::signing_key_from_hex;
use crate::error::{ChainError, ChainResult};
use crate::ledger::{
    Block, Blockchain, ChainEvent, ChainSnapshot, ChainStatistics, ContractState, IntegrityFailure,
    TransactionReceipt, UserRole, UserTransaction,
};
use crate::network::{Envelope, Message, NetworkEvent, NetworkStats, P2PNetwork};
use crate::registry::{
    NodeId, NodeRecord, NodeRegistration, NodeRegistry, NodeStatus, RegistryError, RegistryStats,
};
use crate::storage::ChainStore;

const COMMAND_QUEUE_DEPTH: usize = 256;

/// Everything an operator dashboard wants in one read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeNetworkStats {
    pub node_id: NodeId,
    pub is_validator: bool,
    pub syncing: bool,
    pub chain_length: usize,
    pub chain_valid: bool,
    pub latest_hash: String,
    pub network: NetworkStats,
    pub consensus: ConsensusStats,
    pub registry: RegistryStats,
}

pub(crate) enum Command {
    Submit {
        data: Value,
        reply: oneshot::Sender<ChainResult<Block>>,
    },
    Lookup {
        transaction_id: String,
        reply: oneshot::Sender<Option<TransactionReceipt>>,
    },
    Aggregate {
        contract_id: String,
        reply: oneshot::Sender<ContractState>,
    },
    ExportChain {
        reply: oneshot::Sender<ChainSnapshot>,
    },
    Statistics {
        reply: oneshot::Sender<ChainStatistics>,
    },
    UserTransactions {
        user_id: String,
        role: UserRole,
        reply: oneshot::Sender<Vec<UserTransaction>>,
    },
    Validity {
        reply: oneshot::Sender<Result<(), IntegrityFailure>>,
    },
    NetworkStats {
        reply: oneshot::Sender<NodeNetworkStats>,
    },
    ListNodes {
        reply: oneshot::Sender<Vec<NodeRecord>>,
    },
    RegisterNode {
        registration: NodeRegistration,
        reply: oneshot::Sender<Result<NodeStatus, RegistryError>>,
    },
    NodeAdmin {
        op: NodeOp,
        node_id: String,
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
    ConnectPeer {
        address: String,
        expected_id: Option<String>,
        reply: oneshot::Sender<Result<NodeId>>,
    },
    RequestSync {
        reply: oneshot::Sender<usize>,
    },
    ForceSave {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOp {
    Approve,
    Reject { reason: String },
    Promote,
    Demote,
    Remove { reason: String },
}

pub struct Coordinator {
    config: NodeConfig,
    chain: Blockchain,
    registry: NodeRegistry,
    consensus: ProofOfAuthority,
    network: P2PNetwork,
    net_events: mpsc::Receiver<NetworkEvent>,
    commands: mpsc::Receiver<Command>,
    command_tx: mpsc::Sender<Command>,
    /// Local store first, remote second.
    stores: Vec<Arc<dyn ChainStore>>,
    syncing: bool,
    signing_key: Option<SigningKey>,
}

impl Coordinator {
    pub fn new(config: NodeConfig, stores: Vec<Arc<dyn ChainStore>>) -> Result<Self> {
        let signing_key = match &config.signing_seed {
            Some(seed) => Some(
                signing_key_from_hex(seed)
                    .ok_or_else(|| anyhow!("VALIDATOR_SEED_HEX is not a 32-byte hex seed"))?,
            ),
            None => None,
        };
        let (network, net_events) = P2PNetwork::new(config.node_id.clone());
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        Ok(Self {
            chain: Blockchain::new(),
            registry: NodeRegistry::new(config.approval_policy),
            consensus: ProofOfAuthority::from_config(&config),
            network,
            net_events,
            commands,
            command_tx,
            stores,
            syncing: false,
            signing_key,
            config,
        })
    }

    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle::new(self.command_tx.clone())
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn chain(&self) -> &Blockchain {
        &self.chain
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut NodeRegistry {
        &mut self.registry
    }

    pub fn network(&self) -> &P2PNetwork {
        &self.network
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing
    }

    /// Take the sync guard. `false` if a replacement is already in flight.
    pub fn begin_sync(&mut self) -> bool {
        if self.syncing {
            return false;
        }
        self.syncing = true;
        true
    }

    pub fn end_sync(&mut self) {
        self.syncing = false;
    }

    /// Restore state, register the configured authorities, open the listener
    /// and dial bootstrap peers.
    pub async fn bootstrap(&mut self) -> Result<()> {
        self.load_chain().await;
        self.load_registry().await;
        self.register_authorities();

        let bound = self.network.start(&self.config.listen_addr).await?;
        tracing::info!(
            node = %self.config.node_id,
            addr = %bound,
            length = self.chain.len(),
            validator = self.registry.is_validator(&self.config.node_id),
            "node bootstrapped"
        );

        for peer in self.config.bootstrap_peers.clone() {
            if let Err(e) = self
                .network
                .connect_to_peer(&peer.address, peer.node_id.as_deref())
                .await
            {
                tracing::warn!(addr = %peer.address, "bootstrap peer unreachable: {:#}", e);
            }
        }
        Ok(())
    }

    /// Local store first, then remote; fresh genesis (persisted) when neither has a usable chain.
    pub async fn load_chain(&mut self) {
        let mut loaded_from = None;
        for store in &self.stores {
            match store.load_blockchain().await {
                Ok(Some(snapshot)) => match self.chain.import_snapshot(snapshot) {
                    Ok(()) => {
                        loaded_from = Some(store.name().to_string());
                        break;
                    }
                    Err(e) => tracing::warn!(store = store.name(), "stored chain unusable: {}", e),
                },
                Ok(None) => tracing::debug!(store = store.name(), "no stored chain"),
                Err(e) => tracing::warn!(store = store.name(), "chain load failed: {}", e),
            }
        }
        self.chain.drain_events();

        match loaded_from {
            Some(store) => {
                tracing::info!(%store, length = self.chain.len(), "chain restored");
                // Backfill the other store so both hold the same chain.
                self.persist_chain().await;
            }
            None => {
                tracing::info!("starting from genesis");
                self.chain = Blockchain::new();
                self.persist_chain().await;
            }
        }
    }

    pub async fn load_registry(&mut self) {
        for store in &self.stores {
            match store.load_nodes().await {
                Ok(Some(export)) => {
                    self.registry.import_data(export);
                    tracing::info!(store = store.name(), "registry restored");
                    return;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(store = store.name(), "registry load failed: {}", e),
            }
        }
    }

    fn register_authorities(&mut self) {
        let mut authorities = self.config.authorities.clone();
        if self.config.is_validator {
            authorities.push(self.config.node_id.clone());
        }
        for id in authorities {
            if self.registry.is_validator(&id) {
                continue;
            }
            let address = if id == self.config.node_id {
                self.config.listen_addr.clone()
            } else {
                self.config
                    .bootstrap_peers
                    .iter()
                    .find(|p| p.node_id.as_deref() == Some(id.as_str()))
                    .map(|p| p.address.clone())
                    .unwrap_or_default()
            };
            if let Err(e) = self.registry.register_authority(&id, &address) {
                tracing::warn!(node = %id, "cannot register authority: {}", e);
            }
        }
    }

    /// Seal `data` into a new block on this node and announce it.
    pub async fn submit_payload(&mut self, data: Value) -> ChainResult<Block> {
        let me = self.config.node_id.clone();
        if !self.consensus.can_create_block(&self.registry, &me) {
            return Err(ChainError::NotAuthorized(format!(
                "node {} is not a validator",
                me
            )));
        }
        let block = match &self.signing_key {
            Some(key) => self.chain.append_signed_block(data, Some(&me), key)?,
            None => self.chain.append_block(data, Some(&me))?,
        };
        self.publish_chain_events();
        self.persist_chain().await;
        tracing::info!(index = block.index, hash = %block.hash, "block sealed");
        Ok(block)
    }

    fn publish_chain_events(&mut self) {
        for event in self.chain.drain_events() {
            match event {
                ChainEvent::Appended(block) => {
                    let sent = self.network.broadcast(Message::NewBlock { block });
                    tracing::debug!(peers = sent, "NEW_BLOCK broadcast");
                }
                ChainEvent::Replaced {
                    previous_length,
                    length,
                } => {
                    tracing::info!(previous_length, length, "local chain replaced");
                }
            }
        }
    }

    /// Apply a block received from `from`. `Ok(false)` when dropped because a sync is in flight.
    pub async fn handle_new_block(&mut self, block: Block, from: &str) -> ChainResult<bool> {
        if self.syncing {
            tracing::info!(index = block.index, peer = %from, "sync in progress, dropping NEW_BLOCK");
            return Ok(false);
        }
        self.registry.update_last_seen(from);

        let verdict = self.consensus.validate_new_block(
            &self.registry,
            &block,
            self.chain.latest_block(),
            from,
        );
        if !verdict.is_valid {
            let failed = verdict.failed();
            let rules = verdict
                .failed_rules()
                .iter()
                .map(|r| r.as_str())
                .collect::<Vec<_>>()
                .join(",");
            self.consensus.penalize_node(
                &mut self.registry,
                from,
                &format!("invalid block: {}", rules),
                Severity::Medium,
            );
            tracing::warn!(index = block.index, peer = %from, %rules, "block rejected");
            return Err(ChainError::ConsensusRejection { failed });
        }

        let index = block.index;
        self.chain.accept_block(block)?;
        self.consensus
            .reward_node(&mut self.registry, from, "valid block");
        tracing::info!(index, peer = %from, "block accepted");
        self.persist_chain().await;
        Ok(true)
    }

    /// Run fork choice against a peer's full chain. `None` when another sync holds the guard.
    pub async fn handle_chain_response(
        &mut self,
        remote: Vec<Block>,
        from: &str,
    ) -> Option<ConflictResolution> {
        if !self.begin_sync() {
            tracing::info!(peer = %from, "sync already in progress, ignoring CHAIN_RESPONSE");
            return None;
        }

        let resolution =
            self.consensus
                .resolve_conflict(&self.registry, self.chain.blocks(), &remote, from);
        tracing::info!(
            peer = %from,
            replace = resolution.should_replace,
            reason = resolution.reason.as_str(),
            tiebreaker = resolution.tiebreaker.map(|t| t.as_str()).unwrap_or("none"),
            local = resolution.local_length,
            remote = resolution.remote_length,
            "sync verdict"
        );

        if resolution.should_replace {
            match self.chain.replace_chain(remote) {
                Ok(()) => {
                    self.publish_chain_events();
                    self.persist_chain().await;
                }
                Err(e) => tracing::warn!(peer = %from, "chain replacement refused: {}", e),
            }
        }
        self.end_sync();
        Some(resolution)
    }

    /// Register nodes learned from a peer's NODE_LIST_RESPONSE under the approval policy.
    pub fn merge_node_list(&mut self, nodes: Vec<NodeRecord>) -> usize {
        let mut added = 0;
        for record in nodes {
            if record.node_id == self.config.node_id
                || self.registry.is_known(&record.node_id)
                || self.registry.is_blacklisted(&record.node_id)
            {
                continue;
            }
            let registration = NodeRegistration {
                node_id: Some(record.node_id),
                address: record.address,
                public_key: record.public_key,
            };
            if self.registry.register_node(registration).is_ok() {
                added += 1;
            }
        }
        added
    }

    async fn handle_network_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::PeerConnected { node_id, address } => {
                if self.registry.is_blacklisted(&node_id) {
                    tracing::warn!(peer = %node_id, "blacklisted peer connected, disconnecting");
                    self.network.disconnect_peer(&node_id);
                    return;
                }
                if !self.registry.is_known(&node_id) {
                    let _ = self
                        .registry
                        .register_node(NodeRegistration::new(node_id.clone(), address));
                }
                self.registry.update_last_seen(&node_id);
                self.network.send_to(&node_id, Message::ChainRequest);
                self.network.send_to(&node_id, Message::NodeListRequest);
            }
            NetworkEvent::PeerDisconnected { node_id } => {
                tracing::info!(peer = %node_id, "peer disconnected");
            }
            NetworkEvent::Heartbeat { node_id } => {
                self.registry.update_last_seen(&node_id);
            }
            NetworkEvent::Inbound { peer_id, envelope } => {
                self.handle_envelope(&peer_id, envelope).await;
            }
        }
    }

    async fn handle_envelope(&mut self, peer_id: &str, envelope: Envelope) {
        match envelope.message {
            Message::NewBlock { block } => {
                if let Err(e) = self.handle_new_block(block, peer_id).await {
                    tracing::debug!(peer = %peer_id, "NEW_BLOCK not applied: {}", e);
                }
            }
            Message::NewTransaction { transaction } => {
                let id = transaction
                    .get("transactionId")
                    .and_then(Value::as_str)
                    .unwrap_or("?");
                tracing::info!(peer = %peer_id, tx = id, "NEW_TRANSACTION received");
            }
            Message::ChainRequest => {
                self.network.send_to(
                    peer_id,
                    Message::ChainResponse {
                        chain: self.chain.blocks().to_vec(),
                    },
                );
            }
            Message::ChainResponse { chain } => {
                self.handle_chain_response(chain, peer_id).await;
            }
            Message::NodeListRequest => {
                self.network.send_to(
                    peer_id,
                    Message::NodeListResponse {
                        nodes: self.shareable_nodes(),
                    },
                );
            }
            Message::NodeListResponse { nodes } => {
                let added = self.merge_node_list(nodes);
                if added > 0 {
                    tracing::info!(peer = %peer_id, added, "merged node list");
                    self.persist_registry().await;
                }
            }
            other => tracing::debug!(peer = %peer_id, kind = other.kind(), "ignored message"),
        }
    }

    /// Nodes advertised to peers asking for our node list. Inactive nodes stay local.
    pub fn shareable_nodes(&self) -> Vec<NodeRecord> {
        self.registry.active_nodes().into_iter().cloned().collect()
    }

    /// Ask every peer for its chain; responses are handled as they arrive.
    pub fn request_sync(&self) -> usize {
        self.network.broadcast(Message::ChainRequest)
    }

    pub fn network_stats(&self) -> NodeNetworkStats {
        NodeNetworkStats {
            node_id: self.config.node_id.clone(),
            is_validator: self.registry.is_validator(&self.config.node_id),
            syncing: self.syncing,
            chain_length: self.chain.len(),
            chain_valid: self.chain.is_valid(),
            latest_hash: self.chain.latest_block().hash.clone(),
            network: self.network.stats(),
            consensus: self.consensus.stats(&self.registry),
            registry: self.registry.stats(),
        }
    }

    /// Write the chain to every store. A failing store is logged; the others still get written.
    pub async fn persist_chain(&self) {
        let snapshot = self.chain.export_snapshot();
        let writes = self.stores.iter().map(|store| {
            let snapshot = &snapshot;
            async move { (store.name(), store.save_blockchain(snapshot).await) }
        });
        for (name, result) in join_all(writes).await {
            if let Err(e) = result {
                tracing::warn!(store = name, "chain persist failed: {}", e);
            }
        }
    }

    pub async fn persist_registry(&self) {
        let export = self.registry.export_data();
        let writes = self.stores.iter().map(|store| {
            let export = &export;
            async move { (store.name(), store.save_nodes(export).await) }
        });
        for (name, result) in join_all(writes).await {
            if let Err(e) = result {
                tracing::warn!(store = name, "registry persist failed: {}", e);
            }
        }
    }

    fn apply_node_op(&mut self, op: NodeOp, node_id: &str) -> Result<(), RegistryError> {
        match op {
            NodeOp::Approve => self.registry.approve_node(node_id).map(|_| ()),
            NodeOp::Reject { reason } => self.registry.reject_node(node_id, &reason),
            NodeOp::Promote => self.registry.promote_to_validator(node_id),
            NodeOp::Demote => self.registry.demote_validator(node_id),
            NodeOp::Remove { reason } => {
                self.registry.remove_node(node_id, &reason)?;
                self.network.disconnect_peer(node_id);
                Ok(())
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { data, reply } => {
                let _ = reply.send(self.submit_payload(data).await);
            }
            Command::Lookup {
                transaction_id,
                reply,
            } => {
                let _ = reply.send(self.chain.lookup(&transaction_id));
            }
            Command::Aggregate { contract_id, reply } => {
                let _ = reply.send(self.chain.aggregate(&contract_id));
            }
            Command::ExportChain { reply } => {
                let _ = reply.send(self.chain.export_snapshot());
            }
            Command::Statistics { reply } => {
                let _ = reply.send(self.chain.statistics());
            }
            Command::UserTransactions {
                user_id,
                role,
                reply,
            } => {
                let _ = reply.send(self.chain.user_transactions(&user_id, role));
            }
            Command::Validity { reply } => {
                let _ = reply.send(self.chain.verify_chain());
            }
            Command::NetworkStats { reply } => {
                let _ = reply.send(self.network_stats());
            }
            Command::ListNodes { reply } => {
                let _ = reply.send(self.registry.all_nodes());
            }
            Command::RegisterNode {
                registration,
                reply,
            } => {
                let result = self.registry.register_node(registration);
                if result.is_ok() {
                    self.persist_registry().await;
                }
                let _ = reply.send(result);
            }
            Command::NodeAdmin { op, node_id, reply } => {
                let result = self.apply_node_op(op, &node_id);
                if result.is_ok() {
                    self.persist_registry().await;
                }
                let _ = reply.send(result);
            }
            Command::ConnectPeer {
                address,
                expected_id,
                reply,
            } => {
                // Dialing runs off the loop; PeerConnected triggers the chain request.
                let network = self.network.clone();
                tokio::spawn(async move {
                    let result = network
                        .connect_to_peer(&address, expected_id.as_deref())
                        .await;
                    let _ = reply.send(result);
                });
            }
            Command::RequestSync { reply } => {
                let _ = reply.send(self.request_sync());
            }
            Command::ForceSave { reply } => {
                self.persist_chain().await;
                self.persist_registry().await;
                let _ = reply.send(());
            }
            Command::Shutdown { reply } => {
                // handled by run()
                let _ = reply.send(());
            }
        }
    }

    /// Drive the node until a shutdown command arrives.
    pub async fn run(mut self) -> Result<()> {
        let mut heartbeat = ticker(self.config.heartbeat_interval);
        let mut sweep = ticker(self.config.inactivity_sweep_interval);
        let mut autosave = ticker(self.config.registry_save_interval);
        // interval() fires immediately; skip those first ticks
        heartbeat.tick().await;
        sweep.tick().await;
        autosave.tick().await;

        let shutdown_reply = loop {
            tokio::select! {
                Some(event) = self.net_events.recv() => self.handle_network_event(event).await,
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => break Some(reply),
                    Some(command) => self.handle_command(command).await,
                    None => break None,
                },
                _ = heartbeat.tick() => {
                    let pinged = self.network.ping_all();
                    tracing::debug!(peers = pinged, "heartbeat sweep");
                }
                _ = sweep.tick() => {
                    let marked = self.registry.check_inactive_nodes(self.config.inactivity_timeout);
                    if !marked.is_empty() {
                        self.persist_registry().await;
                    }
                }
                _ = autosave.tick() => self.persist_registry().await,
            }
        };

        self.shutdown().await;
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
        Ok(())
    }

    /// Persist everything, then close the transport.
    pub async fn shutdown(&mut self) {
        tracing::info!(node = %self.config.node_id, "shutting down");
        self.persist_chain().await;
        self.persist_registry().await;
        self.network.shutdown();
    }
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval(period.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
