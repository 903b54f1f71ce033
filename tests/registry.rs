// tests/registry.rs
use agri_ledger::config::ApprovalPolicy;
use agri_ledger::registry::{
    generate_node_id, NodeRegistration, NodeRegistry, NodeStatus, NodeType, RegistryError,
};
use std::time::Duration;

#[test]
fn approval_lifecycle_with_required_approval() {
    let mut reg = NodeRegistry::new(ApprovalPolicy::RequireApproval);
    let status = reg
        .register_node(NodeRegistration::new("farm-coop", "10.1.0.5:6001"))
        .unwrap();
    assert_eq!(status, NodeStatus::Pending);
    assert!(!reg.is_active("farm-coop"));
    assert_eq!(reg.pending_nodes().len(), 1);

    // a pending node cannot be promoted
    assert_eq!(
        reg.promote_to_validator("farm-coop"),
        Err(RegistryError::NotFound("farm-coop".into()))
    );

    let node = reg.approve_node("farm-coop").unwrap();
    assert_eq!(node.status, NodeStatus::Active);
    assert_eq!(node.reputation, 100);
    assert!(reg.pending_nodes().is_empty());

    reg.promote_to_validator("farm-coop").unwrap();
    assert!(reg.is_validator("farm-coop"));
    assert_eq!(reg.get_node("farm-coop").unwrap().node_type, NodeType::Validator);

    reg.demote_validator("farm-coop").unwrap();
    assert!(!reg.is_validator("farm-coop"));
    assert_eq!(
        reg.demote_validator("farm-coop"),
        Err(RegistryError::NotValidator("farm-coop".into()))
    );
}

#[test]
fn auto_approve_activates_immediately() {
    let mut reg = NodeRegistry::new(ApprovalPolicy::AutoApprove);
    assert_eq!(
        reg.register_node(NodeRegistration::new("n1", "h:1")).unwrap(),
        NodeStatus::Active
    );
    assert_eq!(
        reg.register_node(NodeRegistration::new("n1", "h:1")),
        Err(RegistryError::AlreadyRegistered("n1".into()))
    );
    assert_eq!(reg.get_node("n1").unwrap().node_type, NodeType::Peer);
}

#[test]
fn rejected_and_removed_nodes_stay_blacklisted() {
    let mut reg = NodeRegistry::new(ApprovalPolicy::RequireApproval);
    reg.register_node(NodeRegistration::new("spam", "h:1")).unwrap();
    reg.reject_node("spam", "unknown operator").unwrap();
    assert!(reg.is_blacklisted("spam"));
    assert_eq!(
        reg.register_node(NodeRegistration::new("spam", "h:1")),
        Err(RegistryError::Blacklisted("spam".into()))
    );

    reg.register_node(NodeRegistration::new("v1", "h:2")).unwrap();
    reg.approve_node("v1").unwrap();
    reg.promote_to_validator("v1").unwrap();
    reg.remove_node("v1", "double signing").unwrap();
    assert!(!reg.is_validator("v1"));
    assert!(reg.get_node("v1").is_none());
    assert!(reg.is_blacklisted("v1"));
    assert_eq!(
        reg.remove_node("v1", "again"),
        Err(RegistryError::NotFound("v1".into()))
    );
    assert_eq!(reg.stats().blacklisted_nodes, 2);
}

#[test]
fn silent_nodes_go_inactive_and_come_back() {
    let mut reg = NodeRegistry::new(ApprovalPolicy::AutoApprove);
    reg.register_node(NodeRegistration::new("quiet", "h:1")).unwrap();
    reg.register_node(NodeRegistration::new("chatty", "h:2")).unwrap();
    let seen = reg.get_node("quiet").unwrap().last_seen;
    let timeout = Duration::from_secs(300);

    reg.update_last_seen_at("chatty", seen + 299_000);
    let marked = reg.check_inactive_nodes_at(timeout, seen + 300_001);
    assert_eq!(marked, vec!["quiet".to_string()]);
    assert_eq!(reg.get_node("quiet").unwrap().status, NodeStatus::Inactive);
    assert!(reg.is_active("chatty"));

    assert!(reg.update_last_seen_at("quiet", seen + 400_000));
    assert!(reg.is_active("quiet"));
    assert!(!reg.update_last_seen("ghost"));
}

#[test]
fn inactive_validator_cannot_be_demoted() {
    let mut reg = NodeRegistry::new(ApprovalPolicy::AutoApprove);
    reg.register_authority("v1", "h:1").unwrap();
    let seen = reg.get_node("v1").unwrap().last_seen;
    reg.check_inactive_nodes_at(Duration::from_secs(1), seen + 5_000);
    assert_eq!(
        reg.demote_validator("v1"),
        Err(RegistryError::NotActive("v1".into()))
    );
    assert!(reg.is_validator("v1"));
}

#[test]
fn export_import_round_trip() {
    let mut reg = NodeRegistry::new(ApprovalPolicy::RequireApproval);
    reg.register_authority("v1", "h:1").unwrap();
    reg.register_node(NodeRegistration::new("waiting", "h:2")).unwrap();
    reg.register_node(NodeRegistration::new("banned", "h:3")).unwrap();
    reg.reject_node("banned", "test").unwrap();
    reg.update_reputation("v1", -30, "slow");

    let export = reg.export_data();
    let json = serde_json::to_value(&export).unwrap();
    assert!(json["pendingNodes"].is_array());
    assert_eq!(json["validators"][0], "v1");
    assert_eq!(json["nodes"][0]["type"], "validator");

    let mut restored = NodeRegistry::new(ApprovalPolicy::RequireApproval);
    restored.import_data(serde_json::from_value(json).unwrap());
    assert_eq!(restored.export_data(), export);
    assert_eq!(restored.reputation("v1"), Some(70));
    assert!(restored.get_pending("waiting").is_some());
    assert!(restored.is_blacklisted("banned"));
}

#[test]
fn stats_count_each_set() {
    let mut reg = NodeRegistry::new(ApprovalPolicy::RequireApproval);
    reg.register_authority("v1", "h:1").unwrap();
    reg.register_node(NodeRegistration::new("p1", "h:2")).unwrap();
    let stats = reg.stats();
    assert_eq!(stats.total_nodes, 1);
    assert_eq!(stats.active_nodes, 1);
    assert_eq!(stats.validators, 1);
    assert_eq!(stats.pending_nodes, 1);
    assert_eq!(stats.blacklisted_nodes, 0);
}

#[test]
fn registration_without_id_derives_one() {
    let mut reg = NodeRegistry::new(ApprovalPolicy::AutoApprove);
    let req = NodeRegistration {
        node_id: None,
        address: "192.168.1.20:6001".into(),
        public_key: Some("ab".repeat(32)),
    };
    reg.register_node(req).unwrap();
    let node = &reg.all_nodes()[0];
    assert_eq!(node.node_id.len(), 16);
    assert!(node.node_id.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(generate_node_id("10.0.0.1", 6001).len(), 16);
}
