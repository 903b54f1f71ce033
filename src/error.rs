// src/error.rs
use thiserror::Error;

use crate::consensus::RuleResult;
use crate::ledger::IntegrityFailure;

/// Errors surfaced by ledger mutation, block acceptance and the coordinator.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Submitted payload is malformed or misses its correlation id.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("signature error: {0}")]
    Signature(String),

    /// One or more block acceptance rules failed.
    #[error("block rejected by consensus: {}", summarize_rules(.failed))]
    ConsensusRejection { failed: Vec<RuleResult> },

    /// An imported chain failed integrity verification and was discarded.
    #[error("import corruption: {0}")]
    ImportCorruption(IntegrityFailure),

    #[error("snapshot contains no blocks")]
    EmptySnapshot,

    #[error("not authorized: {0}")]
    NotAuthorized(String),
}

impl ChainError {
    /// Names of the failing rules, when this is a consensus rejection.
    pub fn failed_rules(&self) -> Vec<&str> {
        match self {
            ChainError::ConsensusRejection { failed } => {
                failed.iter().map(|r| r.rule.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn summarize_rules(failed: &[RuleResult]) -> String {
    failed
        .iter()
        .map(|r| format!("{} ({})", r.rule.as_str(), r.message))
        .collect::<Vec<_>>()
        .join(", ")
}

pub type ChainResult<T> = Result<T, ChainError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::Rule;

    #[test]
    fn rejection_lists_failed_rules() {
        let err = ChainError::ConsensusRejection {
            failed: vec![RuleResult {
                rule: Rule::PreviousHashCheck,
                valid: false,
                message: "previous hash mismatch".into(),
            }],
        };
        assert_eq!(err.failed_rules(), vec!["PREVIOUS_HASH_CHECK"]);
        assert!(err.to_string().contains("PREVIOUS_HASH_CHECK (previous hash mismatch)"));
        assert!(ChainError::EmptySnapshot.failed_rules().is_empty());
    }
}
