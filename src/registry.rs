// src/registry.rs
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;

use crate::config::ApprovalPolicy;
use crate::crypto::sha256_hex;
use crate::ledger::now_millis;

/// NodeId type alias used across consensus and transport
pub type NodeId = String;

pub const DEFAULT_REPUTATION: i32 = 100;
pub const MIN_REPUTATION: i32 = 0;
pub const MAX_REPUTATION: i32 = 100;
/// Below this the registry reports a low-reputation node.
pub const LOW_REPUTATION_THRESHOLD: i32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Peer,
    Validator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub node_id: NodeId,
    pub address: String,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub status: NodeStatus,
    pub reputation: i32,
    pub registered_at: i64,
    pub last_seen: i64,
}

/// Registration request; `node_id` is derived from the address when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRegistration {
    #[serde(default)]
    pub node_id: Option<NodeId>,
    pub address: String,
    #[serde(default)]
    pub public_key: Option<String>,
}

impl NodeRegistration {
    pub fn new(node_id: impl Into<NodeId>, address: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            address: address.into(),
            public_key: None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("node {0} is blacklisted")]
    Blacklisted(NodeId),
    #[error("node {0} is already registered")]
    AlreadyRegistered(NodeId),
    #[error("node {0} not found")]
    NotFound(NodeId),
    #[error("node {0} is not pending approval")]
    NotPending(NodeId),
    #[error("node {0} must be active")]
    NotActive(NodeId),
    #[error("node {0} is not a validator")]
    NotValidator(NodeId),
}

/// Persisted form: four plain arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryExport {
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub validators: Vec<NodeId>,
    #[serde(default)]
    pub pending_nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub blacklist: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub total_nodes: usize,
    pub active_nodes: usize,
    pub validators: usize,
    pub pending_nodes: usize,
    pub blacklisted_nodes: usize,
}

/// Stable-ish node id: first 16 hex chars of sha256("host:port:millis").
pub fn generate_node_id(host: &str, port: u16) -> NodeId {
    let digest = sha256_hex(format!("{}:{}:{}", host, port, now_millis()));
    digest[..16].to_string()
}

/// Directory of known nodes and the trust state machine over them.
///
/// `pending -> active` (policy or admin), `active -> inactive` (silence, undone by
/// a heartbeat), `active <-> validator` (admin), `pending|active -> blacklisted` (terminal).
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    nodes: BTreeMap<NodeId, NodeRecord>,
    /// Ordered so round-robin selection is identical on every node.
    validators: BTreeSet<NodeId>,
    pending: BTreeMap<NodeId, NodeRecord>,
    blacklist: BTreeSet<NodeId>,
    policy: ApprovalPolicy,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new(ApprovalPolicy::AutoApprove)
    }
}

impl NodeRegistry {
    pub fn new(policy: ApprovalPolicy) -> Self {
        Self {
            nodes: BTreeMap::new(),
            validators: BTreeSet::new(),
            pending: BTreeMap::new(),
            blacklist: BTreeSet::new(),
            policy,
        }
    }

    pub fn policy(&self) -> ApprovalPolicy {
        self.policy
    }

    pub fn register_node(&mut self, req: NodeRegistration) -> Result<NodeStatus, RegistryError> {
        let node_id = match req.node_id {
            Some(id) if !id.is_empty() => id,
            _ => node_id_for_address(&req.address),
        };
        if self.blacklist.contains(&node_id) {
            return Err(RegistryError::Blacklisted(node_id));
        }
        if self.nodes.contains_key(&node_id) || self.pending.contains_key(&node_id) {
            return Err(RegistryError::AlreadyRegistered(node_id));
        }

        let now = now_millis();
        let mut record = NodeRecord {
            node_id: node_id.clone(),
            address: req.address,
            public_key: req.public_key,
            node_type: NodeType::Peer,
            status: NodeStatus::Pending,
            reputation: DEFAULT_REPUTATION,
            registered_at: now,
            last_seen: now,
        };

        match self.policy {
            ApprovalPolicy::RequireApproval => {
                log::info!("Node {} registered, pending approval", node_id);
                self.pending.insert(node_id, record);
                Ok(NodeStatus::Pending)
            }
            ApprovalPolicy::AutoApprove => {
                record.status = NodeStatus::Active;
                log::info!("Node {} registered and active", node_id);
                self.nodes.insert(node_id, record);
                Ok(NodeStatus::Active)
            }
        }
    }

    pub fn approve_node(&mut self, node_id: &str) -> Result<&NodeRecord, RegistryError> {
        let mut record = self
            .pending
            .remove(node_id)
            .ok_or_else(|| RegistryError::NotPending(node_id.to_string()))?;
        record.status = NodeStatus::Active;
        log::info!("Node {} approved", node_id);
        Ok(self.nodes.entry(node_id.to_string()).or_insert(record))
    }

    pub fn reject_node(&mut self, node_id: &str, reason: &str) -> Result<(), RegistryError> {
        if self.pending.remove(node_id).is_none() {
            return Err(RegistryError::NotPending(node_id.to_string()));
        }
        self.blacklist.insert(node_id.to_string());
        log::warn!("Node {} rejected and blacklisted: {}", node_id, reason);
        Ok(())
    }

    pub fn promote_to_validator(&mut self, node_id: &str) -> Result<(), RegistryError> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| RegistryError::NotFound(node_id.to_string()))?;
        if node.status != NodeStatus::Active {
            return Err(RegistryError::NotActive(node_id.to_string()));
        }
        node.node_type = NodeType::Validator;
        self.validators.insert(node_id.to_string());
        log::info!("Node {} promoted to validator", node_id);
        Ok(())
    }

    pub fn demote_validator(&mut self, node_id: &str) -> Result<(), RegistryError> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| RegistryError::NotFound(node_id.to_string()))?;
        if node.status != NodeStatus::Active {
            return Err(RegistryError::NotActive(node_id.to_string()));
        }
        if !self.validators.remove(node_id) {
            return Err(RegistryError::NotValidator(node_id.to_string()));
        }
        node.node_type = NodeType::Peer;
        log::info!("Node {} demoted from validator", node_id);
        Ok(())
    }

    /// Evict a known node from every set and blacklist it permanently.
    pub fn remove_node(&mut self, node_id: &str, reason: &str) -> Result<(), RegistryError> {
        let known = self.nodes.remove(node_id).is_some() | self.pending.remove(node_id).is_some();
        if !known {
            return Err(RegistryError::NotFound(node_id.to_string()));
        }
        self.validators.remove(node_id);
        self.blacklist.insert(node_id.to_string());
        log::warn!("Node {} removed from network: {}", node_id, reason);
        Ok(())
    }

    /// Register (bypassing the approval policy) and promote a configured authority.
    pub fn register_authority(&mut self, node_id: &str, address: &str) -> Result<(), RegistryError> {
        if self.blacklist.contains(node_id) {
            return Err(RegistryError::Blacklisted(node_id.to_string()));
        }
        if self.pending.contains_key(node_id) {
            self.approve_node(node_id)?;
        }
        let now = now_millis();
        let node = self
            .nodes
            .entry(node_id.to_string())
            .or_insert_with(|| NodeRecord {
                node_id: node_id.to_string(),
                address: address.to_string(),
                public_key: None,
                node_type: NodeType::Peer,
                status: NodeStatus::Active,
                reputation: DEFAULT_REPUTATION,
                registered_at: now,
                last_seen: now,
            });
        node.status = NodeStatus::Active;
        self.promote_to_validator(node_id)
    }

    /// Apply `delta` and clamp to [0, 100]. `None` for unknown nodes.
    pub fn update_reputation(&mut self, node_id: &str, delta: i32, reason: &str) -> Option<i32> {
        let node = self.nodes.get_mut(node_id)?;
        node.reputation = node
            .reputation
            .saturating_add(delta)
            .clamp(MIN_REPUTATION, MAX_REPUTATION);
        log::debug!(
            "Reputation of {} changed by {} to {} ({})",
            node_id,
            delta,
            node.reputation,
            reason
        );
        if node.reputation < LOW_REPUTATION_THRESHOLD {
            log::warn!(
                "Node {} has low reputation {} ({})",
                node_id,
                node.reputation,
                reason
            );
        }
        Some(node.reputation)
    }

    pub fn update_last_seen(&mut self, node_id: &str) -> bool {
        self.update_last_seen_at(node_id, now_millis())
    }

    /// Refresh liveness; an inactive node comes back as active.
    pub fn update_last_seen_at(&mut self, node_id: &str, now: i64) -> bool {
        match self.nodes.get_mut(node_id) {
            Some(node) => {
                node.last_seen = now;
                if node.status == NodeStatus::Inactive {
                    node.status = NodeStatus::Active;
                    log::info!("Node {} is active again", node_id);
                }
                true
            }
            None => false,
        }
    }

    pub fn check_inactive_nodes(&mut self, timeout: Duration) -> Vec<NodeId> {
        self.check_inactive_nodes_at(timeout, now_millis())
    }

    /// Mark every active node silent for longer than `timeout` as inactive.
    pub fn check_inactive_nodes_at(&mut self, timeout: Duration, now: i64) -> Vec<NodeId> {
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        let mut marked = Vec::new();
        for (id, node) in self.nodes.iter_mut() {
            if node.status == NodeStatus::Active && now.saturating_sub(node.last_seen) > timeout_ms {
                node.status = NodeStatus::Inactive;
                marked.push(id.clone());
            }
        }
        if !marked.is_empty() {
            log::info!("Marked {} node(s) inactive: {:?}", marked.len(), marked);
        }
        marked
    }

    pub fn get_node(&self, node_id: &str) -> Option<&NodeRecord> {
        self.nodes.get(node_id)
    }

    pub fn get_pending(&self, node_id: &str) -> Option<&NodeRecord> {
        self.pending.get(node_id)
    }

    pub fn all_nodes(&self) -> Vec<NodeRecord> {
        self.nodes.values().cloned().collect()
    }

    pub fn active_nodes(&self) -> Vec<&NodeRecord> {
        self.nodes
            .values()
            .filter(|n| n.status == NodeStatus::Active)
            .collect()
    }

    /// Validator ids in their fixed (sorted) order.
    pub fn validator_ids(&self) -> Vec<NodeId> {
        self.validators.iter().cloned().collect()
    }

    pub fn validators(&self) -> Vec<&NodeRecord> {
        self.validators
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .collect()
    }

    pub fn pending_nodes(&self) -> Vec<&NodeRecord> {
        self.pending.values().collect()
    }

    pub fn is_validator(&self, node_id: &str) -> bool {
        self.validators.contains(node_id)
    }

    pub fn is_active(&self, node_id: &str) -> bool {
        self.nodes
            .get(node_id)
            .is_some_and(|n| n.status == NodeStatus::Active)
    }

    pub fn is_blacklisted(&self, node_id: &str) -> bool {
        self.blacklist.contains(node_id)
    }

    pub fn is_known(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id) || self.pending.contains_key(node_id)
    }

    pub fn reputation(&self, node_id: &str) -> Option<i32> {
        self.nodes.get(node_id).map(|n| n.reputation)
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_nodes: self.nodes.len(),
            active_nodes: self.active_nodes().len(),
            validators: self.validators.len(),
            pending_nodes: self.pending.len(),
            blacklisted_nodes: self.blacklist.len(),
        }
    }

    pub fn export_data(&self) -> RegistryExport {
        RegistryExport {
            nodes: self.nodes.values().cloned().collect(),
            validators: self.validators.iter().cloned().collect(),
            pending_nodes: self.pending.values().cloned().collect(),
            blacklist: self.blacklist.iter().cloned().collect(),
        }
    }

    /// Replace all four collections with the imported ones.
    pub fn import_data(&mut self, data: RegistryExport) {
        self.nodes = data
            .nodes
            .into_iter()
            .map(|n| (n.node_id.clone(), n))
            .collect();
        self.validators = data.validators.into_iter().collect();
        self.pending = data
            .pending_nodes
            .into_iter()
            .map(|n| (n.node_id.clone(), n))
            .collect();
        self.blacklist = data.blacklist.into_iter().collect();
        log::info!(
            "Imported registry: {} nodes, {} validators, {} pending, {} blacklisted",
            self.nodes.len(),
            self.validators.len(),
            self.pending.len(),
            self.blacklist.len()
        );
    }
}

fn node_id_for_address(address: &str) -> NodeId {
    match address.rsplit_once(':') {
        Some((host, port)) => generate_node_id(host, port.parse().unwrap_or(0)),
        None => generate_node_id(address, 0),
    }
}
