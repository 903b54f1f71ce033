// tests/coordinator.rs
use agri_ledger::config::NodeConfig;
use agri_ledger::coordinator::Coordinator;
use agri_ledger::error::ChainError;
use agri_ledger::ledger::{now_millis, Block, Blockchain};
use agri_ledger::registry::NodeStatus;
use agri_ledger::storage::{ChainStore, MemoryStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn config(node_id: &str) -> NodeConfig {
    NodeConfig {
        node_id: node_id.to_string(),
        listen_addr: "127.0.0.1:0".into(),
        ..NodeConfig::default()
    }
}

fn stores(local: &MemoryStore, remote: &MemoryStore) -> Vec<Arc<dyn ChainStore>> {
    vec![Arc::new(local.clone()), Arc::new(remote.clone())]
}

async fn booted(node_id: &str, local: &MemoryStore, remote: &MemoryStore) -> Coordinator {
    let mut node = Coordinator::new(config(node_id), stores(local, remote)).unwrap();
    node.bootstrap().await.unwrap();
    node
}

fn chain_of(len: usize, validator: &str) -> Blockchain {
    let mut chain = Blockchain::new();
    for i in 1..len {
        chain
            .append_block(json!({"transactionId": format!("{validator}-{i}")}), Some(validator))
            .unwrap();
    }
    chain
}

#[tokio::test]
async fn fresh_node_persists_genesis_to_both_stores() {
    let (local, remote) = (MemoryStore::new("local"), MemoryStore::new("remote"));
    let node = booted("n1", &local, &remote).await;
    assert_eq!(node.chain().len(), 1);
    assert_eq!(local.chain().unwrap().blocks.len(), 1);
    assert_eq!(remote.chain().unwrap().blocks.len(), 1);
    assert!(node.registry().is_validator("n1"));
}

#[tokio::test]
async fn remote_chain_used_when_local_absent() {
    let local = MemoryStore::new("local");
    let remote = MemoryStore::new("remote").with_chain(chain_of(4, "v9").export_snapshot());
    let node = booted("n1", &local, &remote).await;
    assert_eq!(node.chain().len(), 4);
    assert!(node.chain().lookup("v9-3").is_some());
    // local store gets backfilled
    assert_eq!(local.chain().unwrap().blocks.len(), 4);
}

#[tokio::test]
async fn corrupt_local_chain_falls_back_to_remote() {
    let mut corrupt = chain_of(3, "v1").export_snapshot();
    corrupt.blocks[1].previous_hash = "bogus".into();
    let local = MemoryStore::new("local").with_chain(corrupt);
    let remote = MemoryStore::new("remote").with_chain(chain_of(2, "v2").export_snapshot());
    let node = booted("n1", &local, &remote).await;
    assert_eq!(node.chain().len(), 2);
    assert!(node.chain().lookup("v2-1").is_some());
}

#[tokio::test]
async fn validator_submission_is_persisted_even_if_remote_fails() {
    let (local, remote) = (MemoryStore::new("local"), MemoryStore::new("remote"));
    let mut node = booted("n1", &local, &remote).await;
    remote.set_failing(true);
    let remote_saves = remote.chain_saves();

    let block = node
        .submit_payload(json!({"transactionId": "harvest-1", "crop": "barley"}))
        .await
        .unwrap();
    assert_eq!(block.index, 1);
    assert_eq!(block.validator_id.as_deref(), Some("n1"));
    assert_eq!(local.chain().unwrap().blocks.len(), 2);
    assert_eq!(remote.chain_saves(), remote_saves);
    assert!(node.chain().lookup("harvest-1").is_some());
}

#[tokio::test]
async fn non_validator_cannot_submit() {
    let (local, remote) = (MemoryStore::new("local"), MemoryStore::new("remote"));
    let cfg = NodeConfig {
        is_validator: false,
        ..config("observer")
    };
    let mut node = Coordinator::new(cfg, stores(&local, &remote)).unwrap();
    node.bootstrap().await.unwrap();
    let err = node
        .submit_payload(json!({"transactionId": "t"}))
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::NotAuthorized(_)));
    assert_eq!(node.chain().len(), 1);
}

#[tokio::test]
async fn malformed_payload_is_a_validation_error() {
    let (local, remote) = (MemoryStore::new("local"), MemoryStore::new("remote"));
    let mut node = booted("n1", &local, &remote).await;
    let err = node.submit_payload(json!({"crop": "oats"})).await.unwrap_err();
    assert!(matches!(err, ChainError::Validation(_)));
}

#[tokio::test]
async fn rejected_block_penalizes_sender() {
    let (local, remote) = (MemoryStore::new("local"), MemoryStore::new("remote"));
    let mut node = booted("n1", &local, &remote).await;
    node.registry_mut().register_authority("v2", "10.0.0.2:6001").unwrap();

    let tip = node.chain().latest_block().clone();
    let bad = Block::new(tip.index + 1, now_millis(), json!({"transactionId": "x"}), "feed", Some("v2".into()));
    let err = node.handle_new_block(bad, "v2").await.unwrap_err();
    assert_eq!(err.failed_rules(), vec!["PREVIOUS_HASH_CHECK"]);
    assert_eq!(node.registry().reputation("v2"), Some(85));
    assert_eq!(node.chain().len(), 1);

    let good = Block::new(tip.index + 1, now_millis(), json!({"transactionId": "y"}), tip.hash.clone(), Some("v2".into()));
    assert!(node.handle_new_block(good, "v2").await.unwrap());
    assert_eq!(node.chain().len(), 2);
    assert_eq!(node.registry().reputation("v2"), Some(87));
}

#[tokio::test]
async fn blocks_are_dropped_while_syncing() {
    let (local, remote) = (MemoryStore::new("local"), MemoryStore::new("remote"));
    let mut node = booted("n1", &local, &remote).await;
    node.registry_mut().register_authority("v2", "h:2").unwrap();
    let tip = node.chain().latest_block().clone();
    let block = Block::new(1, now_millis(), json!({"transactionId": "y"}), tip.hash, Some("v2".into()));

    assert!(node.begin_sync());
    assert!(!node.begin_sync());
    assert!(!node.handle_new_block(block.clone(), "v2").await.unwrap());
    assert_eq!(node.chain().len(), 1);
    assert!(node.handle_chain_response(vec![], "v2").await.is_none());

    node.end_sync();
    assert!(node.handle_new_block(block, "v2").await.unwrap());
}

#[tokio::test]
async fn longer_chain_from_validator_replaces_and_persists() {
    let (local, remote) = (MemoryStore::new("local"), MemoryStore::new("remote"));
    let mut node = booted("n1", &local, &remote).await;
    node.registry_mut().register_authority("v2", "h:2").unwrap();
    let saves = local.chain_saves();

    let shorter = chain_of(1, "v2");
    let verdict = node.handle_chain_response(shorter.blocks().to_vec(), "v2").await.unwrap();
    assert!(!verdict.should_replace);
    assert_eq!(local.chain_saves(), saves);

    let longer = chain_of(4, "v2");
    let verdict = node.handle_chain_response(longer.blocks().to_vec(), "v2").await.unwrap();
    assert!(verdict.should_replace);
    assert_eq!(node.chain().len(), 4);
    assert!(node.chain().lookup("v2-2").is_some());
    assert_eq!(local.chain().unwrap().blocks.len(), 4);
    assert!(!node.is_syncing());
}

#[tokio::test]
async fn node_list_merge_respects_policy_and_blacklist() {
    let (local, remote) = (MemoryStore::new("local"), MemoryStore::new("remote"));
    let mut node = booted("n1", &local, &remote).await;
    node.registry_mut().register_authority("bad", "h:9").unwrap();
    node.registry_mut().remove_node("bad", "test").unwrap();

    let mut other = agri_ledger::registry::NodeRegistry::default();
    other.register_authority("n1", "h:1").unwrap();
    other.register_authority("bad", "h:9").unwrap();
    other
        .register_node(agri_ledger::registry::NodeRegistration::new("fresh", "h:3"))
        .unwrap();

    let added = node.merge_node_list(other.all_nodes());
    assert_eq!(added, 1);
    assert_eq!(node.registry().get_node("fresh").unwrap().status, NodeStatus::Active);
    assert!(!node.registry().is_validator("fresh"));
}

#[tokio::test]
async fn handle_api_end_to_end_between_two_nodes() {
    let (a_local, a_remote) = (MemoryStore::new("local"), MemoryStore::new("remote"));
    let (b_local, b_remote) = (MemoryStore::new("local"), MemoryStore::new("remote"));
    let a_cfg = NodeConfig {
        authorities: vec!["node-b".into()],
        ..config("node-a")
    };
    let b_cfg = NodeConfig {
        authorities: vec!["node-a".into()],
        ..config("node-b")
    };

    let mut a = Coordinator::new(a_cfg, stores(&a_local, &a_remote)).unwrap();
    a.bootstrap().await.unwrap();
    let mut b = Coordinator::new(b_cfg, stores(&b_local, &b_remote)).unwrap();
    b.bootstrap().await.unwrap();
    let b_addr = b.network().local_addr().unwrap().to_string();

    let (a_handle, b_handle) = (a.handle(), b.handle());
    let a_task = tokio::spawn(a.run());
    let b_task = tokio::spawn(b.run());

    let peer = a_handle.connect_peer(&b_addr, Some("node-b")).await.unwrap();
    assert_eq!(peer, "node-b");

    let block = a_handle
        .submit(json!({"contractId": "c-7", "transactionId": "tx-7", "action": "CREATE_CONTRACT", "payload": {"crop": "tea", "status": "created"}}))
        .await
        .unwrap();
    assert_eq!(block.index, 1);

    let mut replicated = None;
    for _ in 0..50 {
        replicated = b_handle.lookup("tx-7").await.unwrap();
        if replicated.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let receipt = replicated.expect("block replicated to node-b");
    assert_eq!(receipt.block_hash, block.hash);

    let aggregate = b_handle.aggregate("c-7").await.unwrap();
    assert_eq!(aggregate.current_status.as_deref(), Some("created"));
    assert!(b_handle.validity().await.unwrap().is_ok());
    assert_eq!(b_handle.statistics().await.unwrap().total_contracts, 1);

    let stats = a_handle.network_stats().await.unwrap();
    assert_eq!(stats.network.peer_count, 1);
    assert_eq!(stats.consensus.total_validators, 2);
    assert_eq!(stats.chain_length, 2);

    // b is an authority on a, so the admin ops apply
    a_handle.demote_node("node-b").await.unwrap();
    assert!(a_handle.demote_node("node-b").await.is_err());
    a_handle.promote_node("node-b").await.unwrap();
    a_handle.force_save().await.unwrap();
    assert!(a_local.nodes().unwrap().validators.contains(&"node-b".to_string()));

    a_handle.shutdown().await.unwrap();
    b_handle.shutdown().await.unwrap();
    a_task.await.unwrap().unwrap();
    b_task.await.unwrap().unwrap();
    assert_eq!(b_local.chain().unwrap().blocks.len(), 2);
}

#[tokio::test]
async fn node_list_reply_omits_inactive_nodes() {
    let (local, remote) = (MemoryStore::new("local"), MemoryStore::new("remote"));
    let mut node = booted("n1", &local, &remote).await;
    node.registry_mut().register_authority("quiet", "h:2").unwrap();
    let seen = node.registry().get_node("quiet").unwrap().last_seen;
    node.registry_mut().update_last_seen_at("n1", seen + 600_000);
    node.registry_mut()
        .check_inactive_nodes_at(Duration::from_secs(300), seen + 600_001);

    let shared: Vec<String> = node.shareable_nodes().into_iter().map(|n| n.node_id).collect();
    assert_eq!(shared, vec!["n1".to_string()]);
    assert_eq!(node.registry().all_nodes().len(), 2);
}
