// src/ledger/contract.rs
// Read models folded from chain history: contract aggregates, statistics, per-user history.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use super::block::Block;

pub const ACTION_CREATE_CONTRACT: &str = "CREATE_CONTRACT";
pub const ACTION_PAYMENT: &str = "PAYMENT";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractEvent {
    pub block_index: u64,
    pub action: Option<String>,
    pub timestamp: i64,
    pub details: Option<Value>,
    pub hash: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractState {
    pub exists: bool,
    pub history: Vec<ContractEvent>,
    pub payments: Vec<Value>,
    pub total_amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_details: Option<Value>,
}

/// Payment amounts arrive either as JSON numbers or numeric strings.
pub fn parse_amount(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn status_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Fold every block carrying `contractId` into its current state, in chain order.
pub fn fold_contract(blocks: &[Block], contract_id: &str) -> ContractState {
    let mut state = ContractState::default();

    for block in blocks {
        if block.data_str("contractId") != Some(contract_id) {
            continue;
        }
        state.exists = true;

        let action = block.data_str("action");
        let payload = block.data.get("payload").filter(|p| !p.is_null());

        state.history.push(ContractEvent {
            block_index: block.index,
            action: action.map(str::to_string),
            timestamp: block.timestamp,
            details: payload.cloned(),
            hash: block.hash.clone(),
        });

        let Some(payload) = payload else {
            continue;
        };

        if action == Some(ACTION_PAYMENT) {
            if let Some(amount) = payload.get("amount").and_then(parse_amount) {
                state.payments.push(payload.clone());
                state.total_amount += amount;
            }
        }

        if let Some(status) = payload.get("status").and_then(status_text) {
            state.current_status = Some(status);
            state.latest_details = Some(payload.clone());
        }

        if action == Some(ACTION_CREATE_CONTRACT) {
            state.contract_details = Some(payload.clone());
        }
    }

    state
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStatistics {
    pub total_blocks: usize,
    pub total_contracts: usize,
    pub total_transactions: usize,
    /// Two decimal places.
    pub total_value: String,
    pub top_crops: Vec<(String, usize)>,
    pub active_farmers: usize,
    pub active_buyers: usize,
    pub chain_valid: bool,
}

pub fn compute_statistics(blocks: &[Block], chain_valid: bool) -> ChainStatistics {
    let mut total_contracts = 0;
    let mut total_transactions = 0;
    let mut total_value = 0.0;
    let mut crops: HashMap<String, usize> = HashMap::new();
    let mut farmers: HashSet<&str> = HashSet::new();
    let mut buyers: HashSet<&str> = HashSet::new();

    for block in blocks.iter().skip(1) {
        let action = block.data_str("action");
        let payload = block.data.get("payload");

        if action == Some(ACTION_CREATE_CONTRACT) {
            total_contracts += 1;
            if let Some(crop) = payload.and_then(|p| p.get("crop")).and_then(Value::as_str) {
                *crops.entry(crop.to_string()).or_default() += 1;
            }
            if let Some(f) = block.data_str("farmerId") {
                farmers.insert(f);
            }
            if let Some(b) = block.data_str("buyerId") {
                buyers.insert(b);
            }
        }

        if action == Some(ACTION_PAYMENT) {
            if let Some(amount) = payload.and_then(|p| p.get("amount")).and_then(parse_amount) {
                total_transactions += 1;
                total_value += amount;
            }
        }
    }

    let mut top_crops: Vec<(String, usize)> = crops.into_iter().collect();
    top_crops.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_crops.truncate(5);

    ChainStatistics {
        total_blocks: blocks.len(),
        total_contracts,
        total_transactions,
        total_value: format!("{:.2}", total_value),
        top_crops,
        active_farmers: farmers.len(),
        active_buyers: buyers.len(),
        chain_valid,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Farmer,
    Buyer,
}

impl UserRole {
    fn id_field(self) -> &'static str {
        match self {
            UserRole::Farmer => "farmerId",
            UserRole::Buyer => "buyerId",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTransaction {
    pub block_index: u64,
    pub timestamp: i64,
    pub data: Value,
    pub hash: String,
}

pub fn collect_user_transactions(blocks: &[Block], user_id: &str, role: UserRole) -> Vec<UserTransaction> {
    blocks
        .iter()
        .filter(|b| {
            b.data_str(role.id_field()) == Some(user_id)
                || b.data_str("from") == Some(user_id)
                || b.data_str("to") == Some(user_id)
        })
        .map(|b| UserTransaction {
            block_index: b.index,
            timestamp: b.timestamp,
            data: b.data.clone(),
            hash: b.hash.clone(),
        })
        .collect()
}
