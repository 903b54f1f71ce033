// src/consensus/mod.rs
// Proof-of-Authority engine. Stateless apart from its configuration; every
// decision reads (or, for reputation, writes) the registry passed in.

pub mod fork_choice;
pub mod leader_rotation;
pub mod reputation;
pub mod validation;

pub use fork_choice::{ConflictReason, ConflictResolution, Tiebreaker};
pub use reputation::{Severity, BLOCK_REWARD};
pub use validation::{BlockValidation, Rule, RuleResult, TimestampWindow};

use serde::{Deserialize, Serialize};

use crate::config::NodeConfig;
use crate::ledger::{now_millis, Block};
use crate::registry::{NodeId, NodeRegistry};

pub const CONSENSUS_TYPE: &str = "PoA";
/// Reported for compatibility; acceptance does not take a vote.
pub const VALIDATION_THRESHOLD: f64 = 0.51;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusStats {
    pub consensus_type: String,
    pub total_validators: usize,
    pub validation_threshold: f64,
    pub active_nodes: usize,
}

#[derive(Debug, Clone)]
pub struct ProofOfAuthority {
    window: TimestampWindow,
}

impl Default for ProofOfAuthority {
    fn default() -> Self {
        Self::new(TimestampWindow {
            future_tolerance: crate::config::DEFAULT_TIMESTAMP_FUTURE_TOLERANCE_MS,
            max_age: crate::config::DEFAULT_TIMESTAMP_MAX_AGE_MS,
        })
    }
}

impl ProofOfAuthority {
    pub fn new(window: TimestampWindow) -> Self {
        Self { window }
    }

    pub fn from_config(config: &NodeConfig) -> Self {
        Self::new(TimestampWindow {
            future_tolerance: config.timestamp_future_tolerance,
            max_age: config.timestamp_max_age,
        })
    }

    pub fn can_create_block(&self, registry: &NodeRegistry, node_id: &str) -> bool {
        registry.is_validator(node_id)
    }

    pub fn select_next_validator(
        &self,
        registry: &NodeRegistry,
        last_validator: Option<&str>,
    ) -> Option<NodeId> {
        leader_rotation::next_validator(&registry.validator_ids(), last_validator)
    }

    pub fn validate_new_block(
        &self,
        registry: &NodeRegistry,
        block: &Block,
        previous: &Block,
        from_node: &str,
    ) -> BlockValidation {
        self.validate_new_block_at(registry, block, previous, from_node, now_millis())
    }

    pub fn validate_new_block_at(
        &self,
        registry: &NodeRegistry,
        block: &Block,
        previous: &Block,
        from_node: &str,
        now: i64,
    ) -> BlockValidation {
        validation::evaluate_block(
            block,
            previous,
            from_node,
            registry.is_validator(from_node),
            now,
            self.window,
        )
    }

    pub fn resolve_conflict(
        &self,
        registry: &NodeRegistry,
        local: &[Block],
        remote: &[Block],
        remote_node_id: &str,
    ) -> ConflictResolution {
        fork_choice::resolve(registry, local, remote, remote_node_id)
    }

    /// Apply the severity's penalty. `None` if the node is unknown.
    pub fn penalize_node(
        &self,
        registry: &mut NodeRegistry,
        node_id: &str,
        reason: &str,
        severity: Severity,
    ) -> Option<i32> {
        let reputation = registry.update_reputation(node_id, severity.penalty(), reason)?;
        log::warn!(
            "Penalized {} ({:?}, {}): reputation now {}",
            node_id,
            severity,
            reason,
            reputation
        );
        if reputation < reputation::CRITICAL_REPUTATION {
            log::error!(
                "Node {} reputation critically low ({}); consider removal",
                node_id,
                reputation
            );
        }
        Some(reputation)
    }

    pub fn reward_node(&self, registry: &mut NodeRegistry, node_id: &str, reason: &str) -> Option<i32> {
        registry.update_reputation(node_id, BLOCK_REWARD, reason)
    }

    pub fn stats(&self, registry: &NodeRegistry) -> ConsensusStats {
        ConsensusStats {
            consensus_type: CONSENSUS_TYPE.to_string(),
            total_validators: registry.validator_ids().len(),
            validation_threshold: VALIDATION_THRESHOLD,
            active_nodes: registry.active_nodes().len(),
        }
    }
}
