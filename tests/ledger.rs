// tests/ledger.rs
use agri_ledger::error::ChainError;
use agri_ledger::ledger::{verify_blocks, Block, Blockchain, IntegrityFault, UserRole};
use agri_ledger::storage::{ChainStore, RocksStore};
use serde_json::{json, Value};

fn contract_chain() -> Blockchain {
    let mut chain = Blockchain::new();
    chain
        .append_block(
            json!({
                "contractId": "c-100",
                "action": "CREATE_CONTRACT",
                "farmerId": "farmer-1",
                "buyerId": "buyer-9",
                "payload": {"crop": "wheat", "quantity": 40, "status": "created"}
            }),
            Some("v1"),
        )
        .unwrap();
    chain
        .append_block(
            json!({
                "contractId": "c-100",
                "action": "BUYER_ACCEPT",
                "buyerId": "buyer-9",
                "payload": {"status": "accepted"}
            }),
            Some("v1"),
        )
        .unwrap();
    chain
        .append_block(
            json!({
                "contractId": "c-100",
                "transactionId": "pay-1",
                "action": "PAYMENT",
                "from": "buyer-9",
                "to": "farmer-1",
                "payload": {"amount": 500}
            }),
            Some("v1"),
        )
        .unwrap();
    chain
}

#[test]
fn repeated_appends_always_verify() {
    let mut chain = Blockchain::new();
    for i in 0..25 {
        chain
            .append_block(json!({"transactionId": format!("tx-{i}"), "n": i}), Some("v1"))
            .unwrap();
        assert!(chain.verify_chain().is_ok(), "chain invalid after {} appends", i + 1);
    }
    assert_eq!(chain.len(), 26);
}

#[test]
fn genesis_is_identical_everywhere() {
    let a = Blockchain::new();
    let b = Blockchain::new();
    assert_eq!(a.latest_block(), b.latest_block());
    assert_eq!(a.latest_block().previous_hash, "0");
    assert_eq!(a.latest_block().timestamp, 1_704_067_200_000);
}

#[test]
fn hash_ignores_key_order() {
    let first: Value =
        serde_json::from_str(r#"{"transactionId":"t","crop":"rice","meta":{"b":1,"a":[2,{"z":0,"y":1}]}}"#).unwrap();
    let second: Value =
        serde_json::from_str(r#"{"meta":{"a":[2,{"y":1,"z":0}],"b":1},"crop":"rice","transactionId":"t"}"#).unwrap();
    let a = Block::new(1, 1_000, first, "prev", None);
    let b = Block::new(1, 1_000, second, "prev", None);
    assert_eq!(a.hash, b.hash);
    assert_eq!(a.merkle_root, b.merkle_root);
}

#[test]
fn snapshot_round_trip_is_lossless() {
    let chain = contract_chain();
    let exported = chain.export_snapshot();
    assert_eq!(exported.metadata.length, 4);
    assert!(exported.metadata.is_valid);

    let mut restored = Blockchain::new();
    restored.import_snapshot(exported.clone()).unwrap();
    let again = restored.export_snapshot();
    assert_eq!(
        serde_json::to_string(&exported.blocks).unwrap(),
        serde_json::to_string(&again.blocks).unwrap()
    );
    assert_eq!(restored.lookup("pay-1").unwrap().block_index, 3);
}

#[test]
fn snapshot_uses_camel_case_fields() {
    let snap = contract_chain().export_snapshot();
    let v = serde_json::to_value(&snap).unwrap();
    assert!(v["metadata"]["lastUpdated"].is_i64());
    assert!(v["metadata"]["isValid"].as_bool().unwrap());
    let block = &v["blocks"][1];
    for field in ["index", "timestamp", "data", "hash", "previousHash", "nonce", "merkleRoot"] {
        assert!(block.get(field).is_some(), "missing {field}");
    }
}

#[test]
fn corrupt_import_resets_to_genesis() {
    let mut snap = contract_chain().export_snapshot();
    snap.blocks[2].data["payload"]["status"] = json!("rejected");

    let mut chain = contract_chain();
    let err = chain.import_snapshot(snap).unwrap_err();
    match err {
        ChainError::ImportCorruption(failure) => {
            assert_eq!(failure.index, 2);
            assert_eq!(failure.fault, IntegrityFault::MerkleRootMismatch);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(chain.len(), 1);
    assert!(chain.lookup("pay-1").is_none());
}

#[test]
fn lookup_reports_confirmations() {
    let mut chain = contract_chain();
    assert_eq!(chain.lookup("pay-1").unwrap().confirmations, 1);
    chain.append_block(json!({"transactionId": "later"}), None).unwrap();
    let receipt = chain.lookup("pay-1").unwrap();
    assert_eq!(receipt.confirmations, 2);
    assert_eq!(receipt.transaction["payload"]["amount"], 500);
    assert!(chain.lookup("missing").is_none());
}

#[test]
fn contract_aggregate_folds_lifecycle() {
    let mut chain = contract_chain();
    let state = chain.aggregate("c-100");
    assert!(state.exists);
    assert_eq!(state.history.len(), 3);
    assert_eq!(state.current_status.as_deref(), Some("accepted"));
    assert_eq!(state.total_amount, 500.0);
    assert_eq!(state.payments.len(), 1);
    assert_eq!(state.contract_details.unwrap()["crop"], "wheat");
}

#[test]
fn string_amounts_are_summed() {
    let mut chain = contract_chain();
    chain
        .append_block(
            json!({"contractId": "c-100", "action": "PAYMENT", "payload": {"amount": "125.50"}}),
            None,
        )
        .unwrap();
    assert_eq!(chain.aggregate("c-100").total_amount, 625.5);
    assert_eq!(chain.statistics().total_value, "625.50");
}

#[test]
fn statistics_summarize_contracts() {
    let mut chain = contract_chain();
    for (i, crop) in ["rice", "rice", "maize"].iter().enumerate() {
        chain
            .append_block(
                json!({
                    "contractId": format!("c-{i}"),
                    "action": "CREATE_CONTRACT",
                    "farmerId": format!("farmer-{i}"),
                    "buyerId": "buyer-9",
                    "payload": {"crop": crop}
                }),
                None,
            )
            .unwrap();
    }
    let stats = chain.statistics();
    assert_eq!(stats.total_blocks, 7);
    assert_eq!(stats.total_contracts, 4);
    assert_eq!(stats.total_transactions, 1);
    assert_eq!(stats.total_value, "500.00");
    assert_eq!(stats.top_crops[0], ("rice".to_string(), 2));
    assert_eq!(stats.active_farmers, 3);
    assert_eq!(stats.active_buyers, 1);
    assert!(stats.chain_valid);
}

#[test]
fn user_history_by_role() {
    let chain = contract_chain();
    let farmer = chain.user_transactions("farmer-1", UserRole::Farmer);
    assert_eq!(farmer.iter().map(|t| t.block_index).collect::<Vec<_>>(), vec![1, 3]);
    let buyer = chain.user_transactions("buyer-9", UserRole::Buyer);
    assert_eq!(buyer.len(), 3);
    assert!(chain.user_transactions("nobody", UserRole::Buyer).is_empty());
}

#[test]
fn verify_reports_broken_index() {
    let chain = contract_chain();
    let mut blocks = chain.blocks().to_vec();
    blocks.remove(1);
    let failure = verify_blocks(&blocks).unwrap_err();
    assert_eq!(failure.index, 1);
    assert_eq!(failure.fault, IntegrityFault::IndexMismatch);
}

#[tokio::test]
async fn rocks_store_persists_chain_and_backups() {
    let dir = tempfile::tempdir().unwrap();
    let chain = contract_chain();
    {
        let store = RocksStore::open(dir.path()).unwrap();
        assert!(store.load_blockchain().await.unwrap().is_none());
        for _ in 0..7 {
            store.save_blockchain(&chain.export_snapshot()).await.unwrap();
            // backup keys are millisecond-stamped
            tokio::time::sleep(std::time::Duration::from_millis(3)).await;
        }
        assert_eq!(store.backups().await.unwrap().len(), 5);
    }

    let store = RocksStore::open(dir.path()).unwrap();
    let loaded = store.load_blockchain().await.unwrap().expect("chain stored");
    let mut restored = Blockchain::new();
    restored.import_snapshot(loaded).unwrap();
    assert_eq!(restored.blocks(), chain.blocks());
}
