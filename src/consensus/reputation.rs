// src/consensus/reputation.rs
use serde::{Deserialize, Serialize};

/// Reputation added for each accepted block.
pub const BLOCK_REWARD: i32 = 2;
/// A penalty leaving a node below this is logged as an error.
pub const CRITICAL_REPUTATION: i32 = 10;

/// Penalty severity levels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Reputation delta applied for this severity.
    pub fn penalty(&self) -> i32 {
        match self {
            Severity::Low => -5,
            Severity::Medium => -15,
            Severity::High => -30,
            Severity::Critical => -50,
        }
    }
}
