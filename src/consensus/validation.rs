// src/consensus/validation.rs
// Block acceptance rule set. Every rule is evaluated and reported on its own.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ChainError, ChainResult};
use crate::ledger::Block;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rule {
    ValidatorCheck,
    IndexCheck,
    PreviousHashCheck,
    HashCheck,
    MerkleRootCheck,
    TimestampCheck,
}

impl Rule {
    pub const ALL: [Rule; 6] = [
        Rule::ValidatorCheck,
        Rule::IndexCheck,
        Rule::PreviousHashCheck,
        Rule::HashCheck,
        Rule::MerkleRootCheck,
        Rule::TimestampCheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::ValidatorCheck => "VALIDATOR_CHECK",
            Rule::IndexCheck => "INDEX_CHECK",
            Rule::PreviousHashCheck => "PREVIOUS_HASH_CHECK",
            Rule::HashCheck => "HASH_CHECK",
            Rule::MerkleRootCheck => "MERKLE_ROOT_CHECK",
            Rule::TimestampCheck => "TIMESTAMP_CHECK",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule: Rule,
    pub valid: bool,
    pub message: String,
}

impl RuleResult {
    fn check(rule: Rule, valid: bool, ok: &str, bad: &str) -> Self {
        Self {
            rule,
            valid,
            message: if valid { ok } else { bad }.to_string(),
        }
    }
}

/// Verdict over all six rules; `is_valid` is their conjunction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockValidation {
    pub is_valid: bool,
    pub validations: Vec<RuleResult>,
    pub validator_id: String,
}

impl BlockValidation {
    pub fn failed(&self) -> Vec<RuleResult> {
        self.validations.iter().filter(|r| !r.valid).cloned().collect()
    }

    pub fn failed_rules(&self) -> Vec<Rule> {
        self.validations
            .iter()
            .filter(|r| !r.valid)
            .map(|r| r.rule)
            .collect()
    }

    pub fn passed(&self, rule: Rule) -> bool {
        self.validations
            .iter()
            .any(|r| r.rule == rule && r.valid)
    }

    /// `Err(ConsensusRejection)` carrying every failing rule.
    pub fn into_result(self) -> ChainResult<()> {
        if self.is_valid {
            Ok(())
        } else {
            Err(ChainError::ConsensusRejection {
                failed: self.failed(),
            })
        }
    }
}

/// Accepted distance between a block timestamp and local time, in millis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampWindow {
    pub future_tolerance: i64,
    pub max_age: i64,
}

pub fn check_timestamp(timestamp: i64, now: i64, window: TimestampWindow) -> RuleResult {
    let (valid, message) = if timestamp > now.saturating_add(window.future_tolerance) {
        (false, "Block timestamp is in the future")
    } else if now.saturating_sub(timestamp) > window.max_age {
        (false, "Block is too old")
    } else {
        (true, "Block timestamp is valid")
    };
    RuleResult {
        rule: Rule::TimestampCheck,
        valid,
        message: message.to_string(),
    }
}

pub fn evaluate_block(
    block: &Block,
    previous: &Block,
    from_node: &str,
    from_is_validator: bool,
    now: i64,
    window: TimestampWindow,
) -> BlockValidation {
    let validations = vec![
        RuleResult::check(
            Rule::ValidatorCheck,
            from_is_validator,
            "Block creator is a valid validator",
            "Block creator is not a validator",
        ),
        RuleResult::check(
            Rule::IndexCheck,
            block.index == previous.index + 1,
            "Block index is correct",
            "Invalid block index",
        ),
        RuleResult::check(
            Rule::PreviousHashCheck,
            block.previous_hash == previous.hash,
            "Previous hash is correct",
            "Previous hash mismatch",
        ),
        RuleResult::check(
            Rule::HashCheck,
            block.has_valid_hash(),
            "Block hash is valid",
            "Block hash is invalid",
        ),
        RuleResult::check(
            Rule::MerkleRootCheck,
            block.has_valid_merkle_root(),
            "Merkle root is valid",
            "Merkle root is invalid",
        ),
        check_timestamp(block.timestamp, now, window),
    ];
    BlockValidation {
        is_valid: validations.iter().all(|r| r.valid),
        validations,
        validator_id: from_node.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: TimestampWindow = TimestampWindow {
        future_tolerance: 60_000,
        max_age: 3_600_000,
    };

    #[test]
    fn timestamp_window_edges() {
        let now = 10_000_000;
        assert!(check_timestamp(now + 60_000, now, WINDOW).valid);
        assert!(!check_timestamp(now + 61_000, now, WINDOW).valid);
        assert!(check_timestamp(now - 3_600_000, now, WINDOW).valid);
        assert!(!check_timestamp(now - 3_600_001, now, WINDOW).valid);
    }

    #[test]
    fn rule_names_are_screaming_snake() {
        let json = serde_json::to_string(&Rule::PreviousHashCheck).unwrap();
        assert_eq!(json, "\"PREVIOUS_HASH_CHECK\"");
        assert_eq!(Rule::MerkleRootCheck.to_string(), "MERKLE_ROOT_CHECK");
    }
}
