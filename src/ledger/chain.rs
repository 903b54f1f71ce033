// src/ledger/chain.rs
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::block::{Block, GENESIS_PREVIOUS_HASH};
use super::contract::{
    collect_user_transactions, compute_statistics, fold_contract, ChainStatistics, ContractState,
    UserRole, UserTransaction,
};
use super::{now_millis, IntegrityFailure, IntegrityFault};
use crate::crypto::keys::{verify_payload_signature, PayloadSignature};
use crate::error::{ChainError, ChainResult};

/// Kept for snapshot format compatibility; no work is performed against it.
pub const DEFAULT_DIFFICULTY: u32 = 2;

/// Where a correlated transaction lives in the chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxLocation {
    pub block_index: u64,
    pub block_hash: String,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction: Value,
    pub block_index: u64,
    pub block_hash: String,
    pub timestamp: i64,
    pub confirmations: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub length: usize,
    pub difficulty: u32,
    pub last_updated: i64,
    pub is_valid: bool,
}

/// Full serialized chain as exchanged with the persistence backends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub metadata: SnapshotMetadata,
    pub blocks: Vec<Block>,
}

/// Lifecycle notifications queued for the owner to drain.
#[derive(Clone, Debug, PartialEq)]
pub enum ChainEvent {
    Appended(Block),
    Replaced { previous_length: usize, length: usize },
}

/// Walk `blocks` once, recomputing hash and merkle root and checking linkage.
/// Returns the first failing block.
pub fn verify_blocks(blocks: &[Block]) -> Result<(), IntegrityFailure> {
    let Some(genesis) = blocks.first() else {
        return Err(IntegrityFailure {
            index: 0,
            fault: IntegrityFault::Empty,
        });
    };
    let fail = |index: u64, fault: IntegrityFault| -> Result<(), IntegrityFailure> {
        Err(IntegrityFailure { index, fault })
    };

    if genesis.index != 0 || genesis.previous_hash != GENESIS_PREVIOUS_HASH {
        return fail(0, IntegrityFault::Genesis);
    }
    if !genesis.has_valid_merkle_root() {
        return fail(0, IntegrityFault::MerkleRootMismatch);
    }
    if !genesis.has_valid_hash() {
        return fail(0, IntegrityFault::HashMismatch);
    }

    for (pos, pair) in blocks.windows(2).enumerate() {
        let (prev, current) = (&pair[0], &pair[1]);
        let expected = pos as u64 + 1;
        if current.index != expected {
            return fail(expected, IntegrityFault::IndexMismatch);
        }
        if current.previous_hash != prev.hash {
            return fail(expected, IntegrityFault::BrokenLink);
        }
        if !current.has_valid_merkle_root() {
            return fail(expected, IntegrityFault::MerkleRootMismatch);
        }
        if !current.has_valid_hash() {
            return fail(expected, IntegrityFault::HashMismatch);
        }
    }
    Ok(())
}

/// Append-only chain with its derived indexes.
///
/// Never empty: block 0 is always the deterministic genesis block or the
/// genesis of an imported chain.
#[derive(Debug)]
pub struct Blockchain {
    blocks: Vec<Block>,
    tx_index: HashMap<String, TxLocation>,
    contract_cache: HashMap<String, ContractState>,
    difficulty: u32,
    events: Vec<ChainEvent>,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    pub fn new() -> Self {
        Self {
            blocks: vec![Block::genesis()],
            tx_index: HashMap::new(),
            contract_cache: HashMap::new(),
            difficulty: DEFAULT_DIFFICULTY,
            events: Vec::new(),
        }
    }

    pub fn create_genesis() -> Block {
        Block::genesis()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn latest_block(&self) -> &Block {
        // invariant: at least genesis
        &self.blocks[self.blocks.len() - 1]
    }

    /// Reject payloads that are not objects carrying a string correlation id,
    /// or whose embedded transaction signature does not verify.
    pub fn validate_payload(data: &Value) -> ChainResult<()> {
        if !data.is_object() {
            return Err(ChainError::Validation("payload must be a JSON object".into()));
        }
        let has_id = ["transactionId", "contractId"]
            .iter()
            .any(|f| data.get(*f).and_then(Value::as_str).is_some_and(|s| !s.is_empty()));
        if !has_id {
            return Err(ChainError::Validation(
                "payload requires transactionId or contractId".into(),
            ));
        }
        match verify_payload_signature(data) {
            PayloadSignature::Invalid => Err(ChainError::Signature(
                "transaction signature does not verify".into(),
            )),
            PayloadSignature::Incomplete => {
                tracing::warn!("payload carries incomplete signature information; accepting unsigned");
                Ok(())
            }
            PayloadSignature::Unsigned | PayloadSignature::Valid => Ok(()),
        }
    }

    pub fn append_block(&mut self, data: Value, validator_id: Option<&str>) -> ChainResult<Block> {
        self.append_block_at(data, validator_id, now_millis(), None)
    }

    /// Append and sign the new block's hash with the validator key.
    pub fn append_signed_block(
        &mut self,
        data: Value,
        validator_id: Option<&str>,
        key: &SigningKey,
    ) -> ChainResult<Block> {
        self.append_block_at(data, validator_id, now_millis(), Some(key))
    }

    /// Seal `data` on top of the current tip at the given instant.
    pub fn append_block_at(
        &mut self,
        data: Value,
        validator_id: Option<&str>,
        timestamp: i64,
        key: Option<&SigningKey>,
    ) -> ChainResult<Block> {
        Self::validate_payload(&data)?;
        let tip = self.latest_block();
        let mut block = Block::new(
            tip.index + 1,
            timestamp,
            data,
            tip.hash.clone(),
            validator_id.map(str::to_string),
        );
        if let Some(key) = key {
            block.sign(key);
        }
        self.push_block(block.clone());
        self.events.push(ChainEvent::Appended(block.clone()));
        tracing::debug!(index = block.index, hash = %block.hash, "block appended");
        Ok(block)
    }

    /// Append a block sealed elsewhere, already approved by consensus.
    /// Still refuses anything that would break linkage or hashing.
    pub fn accept_block(&mut self, block: Block) -> ChainResult<()> {
        let tip = self.latest_block();
        if block.index != tip.index + 1 || block.previous_hash != tip.hash {
            return Err(ChainError::Validation(format!(
                "block {} does not extend tip {}",
                block.index, tip.index
            )));
        }
        if !block.has_valid_merkle_root() || !block.has_valid_hash() {
            return Err(ChainError::Validation(format!(
                "block {} hash does not match contents",
                block.index
            )));
        }
        self.push_block(block);
        Ok(())
    }

    fn push_block(&mut self, block: Block) {
        self.index_block(&block);
        if let Some(cid) = block.data_str("contractId") {
            self.contract_cache.remove(cid);
        }
        self.blocks.push(block);
    }

    fn index_block(&mut self, block: &Block) {
        if let Some(tx_id) = block.data_str("transactionId") {
            self.tx_index.insert(
                tx_id.to_string(),
                TxLocation {
                    block_index: block.index,
                    block_hash: block.hash.clone(),
                    timestamp: block.timestamp,
                },
            );
        }
    }

    fn rebuild_index(&mut self) {
        self.tx_index.clear();
        self.contract_cache.clear();
        let blocks = std::mem::take(&mut self.blocks);
        for block in &blocks {
            self.index_block(block);
        }
        self.blocks = blocks;
    }

    pub fn verify_chain(&self) -> Result<(), IntegrityFailure> {
        verify_blocks(&self.blocks)
    }

    pub fn is_valid(&self) -> bool {
        self.verify_chain().is_ok()
    }

    pub fn lookup(&self, transaction_id: &str) -> Option<TransactionReceipt> {
        let loc = self.tx_index.get(transaction_id)?;
        let block = self.blocks.get(loc.block_index as usize)?;
        Some(TransactionReceipt {
            transaction: block.data.clone(),
            block_index: loc.block_index,
            block_hash: loc.block_hash.clone(),
            timestamp: loc.timestamp,
            confirmations: self.blocks.len() as u64 - loc.block_index,
        })
    }

    pub fn tx_location(&self, transaction_id: &str) -> Option<&TxLocation> {
        self.tx_index.get(transaction_id)
    }

    /// Contract aggregate; existing contracts are cached until a new block references them.
    pub fn aggregate(&mut self, contract_id: &str) -> ContractState {
        if let Some(cached) = self.contract_cache.get(contract_id) {
            return cached.clone();
        }
        let state = fold_contract(&self.blocks, contract_id);
        if state.exists {
            self.contract_cache
                .insert(contract_id.to_string(), state.clone());
        }
        state
    }

    pub fn is_aggregate_cached(&self, contract_id: &str) -> bool {
        self.contract_cache.contains_key(contract_id)
    }

    pub fn statistics(&self) -> ChainStatistics {
        compute_statistics(&self.blocks, self.is_valid())
    }

    pub fn user_transactions(&self, user_id: &str, role: UserRole) -> Vec<UserTransaction> {
        collect_user_transactions(&self.blocks, user_id, role)
    }

    pub fn export_snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            metadata: SnapshotMetadata {
                length: self.blocks.len(),
                difficulty: self.difficulty,
                last_updated: now_millis(),
                is_valid: self.is_valid(),
            },
            blocks: self.blocks.clone(),
        }
    }

    /// Adopt a full snapshot only if every block verifies. A corrupt snapshot
    /// leaves a fresh genesis chain behind; an empty one changes nothing.
    pub fn import_snapshot(&mut self, snapshot: ChainSnapshot) -> ChainResult<()> {
        if snapshot.blocks.is_empty() {
            return Err(ChainError::EmptySnapshot);
        }
        if let Err(failure) = verify_blocks(&snapshot.blocks) {
            tracing::warn!(%failure, "imported chain failed verification, resetting to genesis");
            *self = Self {
                events: std::mem::take(&mut self.events),
                ..Self::new()
            };
            return Err(ChainError::ImportCorruption(failure));
        }
        self.blocks = snapshot.blocks;
        self.difficulty = snapshot.metadata.difficulty;
        self.rebuild_index();
        tracing::info!(length = self.blocks.len(), "chain imported");
        Ok(())
    }

    /// Swap in a whole replacement chain. Verified first; on failure the local
    /// chain is untouched.
    pub fn replace_chain(&mut self, blocks: Vec<Block>) -> ChainResult<()> {
        if blocks.is_empty() {
            return Err(ChainError::EmptySnapshot);
        }
        verify_blocks(&blocks).map_err(ChainError::ImportCorruption)?;
        let previous_length = self.blocks.len();
        self.blocks = blocks;
        self.rebuild_index();
        self.events.push(ChainEvent::Replaced {
            previous_length,
            length: self.blocks.len(),
        });
        Ok(())
    }

    pub fn drain_events(&mut self) -> Vec<ChainEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn appended_chain_verifies() {
        let mut chain = Blockchain::new();
        for i in 0..5 {
            chain
                .append_block(json!({"transactionId": format!("tx-{i}")}), Some("v1"))
                .unwrap();
        }
        assert_eq!(chain.len(), 6);
        assert!(chain.verify_chain().is_ok());
        assert_eq!(chain.drain_events().len(), 5);
        assert!(chain.drain_events().is_empty());
    }

    #[test]
    fn payload_without_correlation_id_is_rejected() {
        let mut chain = Blockchain::new();
        let err = chain.append_block(json!({"crop": "wheat"}), None).unwrap_err();
        assert!(matches!(err, ChainError::Validation(_)));
        let err = chain.append_block(json!("text"), None).unwrap_err();
        assert!(matches!(err, ChainError::Validation(_)));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn tampering_reports_first_failing_index() {
        let mut chain = Blockchain::new();
        for i in 0..3 {
            chain
                .append_block(json!({"transactionId": format!("tx-{i}")}), None)
                .unwrap();
        }
        let mut blocks = chain.blocks().to_vec();
        blocks[2].data = json!({"transactionId": "forged"});
        let failure = verify_blocks(&blocks).unwrap_err();
        assert_eq!(failure.index, 2);
        assert_eq!(failure.fault, IntegrityFault::MerkleRootMismatch);

        let mut blocks = chain.blocks().to_vec();
        blocks[3].previous_hash = "x".into();
        assert_eq!(verify_blocks(&blocks).unwrap_err().fault, IntegrityFault::BrokenLink);
    }

    #[test]
    fn accept_block_rejects_non_extending_block() {
        let mut chain = Blockchain::new();
        let stray = Block::new(5, 1, json!({"transactionId": "t"}), "nope", None);
        assert!(chain.accept_block(stray).is_err());

        let good = Block::new(
            1,
            now_millis(),
            json!({"transactionId": "t"}),
            chain.latest_block().hash.clone(),
            Some("v".into()),
        );
        chain.accept_block(good).unwrap();
        assert_eq!(chain.len(), 2);
        assert!(chain.lookup("t").is_some());
        assert!(chain.drain_events().is_empty());
    }

    #[test]
    fn aggregate_cache_invalidated_by_new_block() {
        let mut chain = Blockchain::new();
        chain
            .append_block(json!({"contractId": "c1", "action": "CREATE_CONTRACT", "payload": {"status": "created"}}), None)
            .unwrap();
        assert_eq!(chain.aggregate("c1").current_status.as_deref(), Some("created"));
        assert!(chain.is_aggregate_cached("c1"));

        chain
            .append_block(json!({"contractId": "c1", "action": "BUYER_ACCEPT", "payload": {"status": "accepted"}}), None)
            .unwrap();
        assert!(!chain.is_aggregate_cached("c1"));
        assert_eq!(chain.aggregate("c1").current_status.as_deref(), Some("accepted"));

        assert!(!chain.aggregate("nope").exists);
        assert!(!chain.is_aggregate_cached("nope"));
    }

    #[test]
    fn empty_snapshot_leaves_chain_untouched() {
        let mut chain = Blockchain::new();
        chain.append_block(json!({"transactionId": "t"}), None).unwrap();
        let mut snap = chain.export_snapshot();
        snap.blocks.clear();
        assert!(matches!(chain.import_snapshot(snap), Err(ChainError::EmptySnapshot)));
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn replace_chain_refuses_corrupt_blocks() {
        let mut chain = Blockchain::new();
        chain.append_block(json!({"transactionId": "keep"}), None).unwrap();
        let mut other = Blockchain::new();
        other.append_block(json!({"transactionId": "a"}), None).unwrap();
        other.append_block(json!({"transactionId": "b"}), None).unwrap();
        let mut forged = other.blocks().to_vec();
        forged[1].timestamp += 1;

        assert!(chain.replace_chain(forged).is_err());
        assert!(chain.lookup("keep").is_some());

        chain.drain_events();
        chain.replace_chain(other.blocks().to_vec()).unwrap();
        assert!(chain.lookup("keep").is_none());
        assert_eq!(chain.lookup("b").unwrap().confirmations, 1);
        assert_eq!(
            chain.drain_events(),
            vec![ChainEvent::Replaced { previous_length: 2, length: 3 }]
        );
    }
}
