// src/consensus/fork_choice.rs
// Deterministic fork choice between the local chain and a peer's chain.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ledger::{verify_blocks, Block};
use crate::registry::NodeRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    UntrustedSource,
    Shorter,
    IntegrityFailed,
    FewerValidatorBlocks,
    EqualLength,
    Longer,
}

impl ConflictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictReason::UntrustedSource => "untrusted_source",
            ConflictReason::Shorter => "shorter",
            ConflictReason::IntegrityFailed => "integrity_failed",
            ConflictReason::FewerValidatorBlocks => "fewer_validator_blocks",
            ConflictReason::EqualLength => "equal_length",
            ConflictReason::Longer => "longer",
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which comparison settled an equal-length conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tiebreaker {
    ValidatorReputation,
    BlockTimestamp,
    TimestampEqual,
}

impl Tiebreaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tiebreaker::ValidatorReputation => "validator_reputation",
            Tiebreaker::BlockTimestamp => "block_timestamp",
            Tiebreaker::TimestampEqual => "timestamp_equal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolution {
    pub should_replace: bool,
    pub reason: ConflictReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tiebreaker: Option<Tiebreaker>,
    pub local_length: usize,
    pub remote_length: usize,
}

/// Blocks sealed by a node the registry currently lists as validator.
pub fn count_validator_blocks(registry: &NodeRegistry, blocks: &[Block]) -> usize {
    blocks
        .iter()
        .filter(|b| {
            b.validator_id
                .as_deref()
                .is_some_and(|id| registry.is_validator(id))
        })
        .count()
}

fn last_validator_reputation(registry: &NodeRegistry, block: &Block) -> i32 {
    block
        .validator_id
        .as_deref()
        .and_then(|id| registry.reputation(id))
        .unwrap_or(0)
}

/// Checks run in a fixed order so every node reaches the same verdict for the
/// same inputs: trust, length, integrity, validator authorship, then the
/// equal-length tiebreakers.
pub fn resolve(
    registry: &NodeRegistry,
    local: &[Block],
    remote: &[Block],
    remote_node_id: &str,
) -> ConflictResolution {
    let verdict = |should_replace, reason, tiebreaker| ConflictResolution {
        should_replace,
        reason,
        tiebreaker,
        local_length: local.len(),
        remote_length: remote.len(),
    };

    if !registry.is_validator(remote_node_id) && !registry.is_active(remote_node_id) {
        return verdict(false, ConflictReason::UntrustedSource, None);
    }
    if remote.len() < local.len() {
        return verdict(false, ConflictReason::Shorter, None);
    }
    if verify_blocks(remote).is_err() {
        return verdict(false, ConflictReason::IntegrityFailed, None);
    }
    if count_validator_blocks(registry, remote) < count_validator_blocks(registry, local) {
        return verdict(false, ConflictReason::FewerValidatorBlocks, None);
    }

    if remote.len() == local.len() {
        let (Some(remote_tip), Some(local_tip)) = (remote.last(), local.last()) else {
            return verdict(false, ConflictReason::EqualLength, Some(Tiebreaker::TimestampEqual));
        };
        let remote_rep = last_validator_reputation(registry, remote_tip);
        let local_rep = last_validator_reputation(registry, local_tip);
        if remote_rep != local_rep {
            return verdict(
                remote_rep > local_rep,
                ConflictReason::EqualLength,
                Some(Tiebreaker::ValidatorReputation),
            );
        }
        if remote_tip.timestamp < local_tip.timestamp {
            return verdict(true, ConflictReason::EqualLength, Some(Tiebreaker::BlockTimestamp));
        }
        return verdict(false, ConflictReason::EqualLength, Some(Tiebreaker::TimestampEqual));
    }

    verdict(true, ConflictReason::Longer, None)
}
