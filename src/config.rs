// src/config.rs
// Node configuration: every recognised option with its default, env loading and validation.

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::crypto::keys::signing_key_from_hex;
use crate::registry::generate_node_id;

/// How newly registered nodes enter the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalPolicy {
    /// Registration immediately yields an active node.
    AutoApprove,
    /// Registration parks the node as pending until an admin approves it.
    RequireApproval,
}

impl FromStr for ApprovalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "auto_approve" | "autoapprove" => Ok(ApprovalPolicy::AutoApprove),
            "require" | "require_approval" | "requireapproval" | "manual" => {
                Ok(ApprovalPolicy::RequireApproval)
            }
            other => Err(format!("unknown approval policy '{}'", other)),
        }
    }
}

/// A peer to dial at startup: `address` optionally paired with the node id it should answer with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapPeer {
    pub address: String,
    pub node_id: Option<String>,
}

impl FromStr for BootstrapPeer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty peer entry".into());
        }
        match s.split_once('@') {
            Some((addr, id)) if !addr.is_empty() && !id.is_empty() => Ok(BootstrapPeer {
                address: addr.to_string(),
                node_id: Some(id.to_string()),
            }),
            Some(_) => Err(format!("malformed peer entry '{}'", s)),
            None => Ok(BootstrapPeer {
                address: s.to_string(),
                node_id: None,
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    pub listen_addr: String,
    pub data_dir: PathBuf,
    pub remote_store_url: Option<String>,
    pub approval_policy: ApprovalPolicy,
    pub inactivity_timeout: Duration,
    pub inactivity_sweep_interval: Duration,
    pub heartbeat_interval: Duration,
    pub registry_save_interval: Duration,
    /// Millis a block may be ahead of local time.
    pub timestamp_future_tolerance: i64,
    /// Millis a block may lag behind local time.
    pub timestamp_max_age: i64,
    pub is_validator: bool,
    /// Node ids registered and promoted as validators at startup.
    pub authorities: Vec<String>,
    pub bootstrap_peers: Vec<BootstrapPeer>,
    /// Hex encoded 32-byte ed25519 seed used to sign sealed blocks.
    pub signing_seed: Option<String>,
}

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:6001";
pub const DEFAULT_TIMESTAMP_FUTURE_TOLERANCE_MS: i64 = 60_000;
pub const DEFAULT_TIMESTAMP_MAX_AGE_MS: i64 = 3_600_000;

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: generate_node_id("0.0.0.0", 6001),
            listen_addr: DEFAULT_LISTEN_ADDR.into(),
            data_dir: PathBuf::from("./data"),
            remote_store_url: None,
            approval_policy: ApprovalPolicy::AutoApprove,
            inactivity_timeout: Duration::from_secs(5 * 60),
            inactivity_sweep_interval: Duration::from_secs(5 * 60),
            heartbeat_interval: Duration::from_secs(30),
            registry_save_interval: Duration::from_secs(2 * 60),
            timestamp_future_tolerance: DEFAULT_TIMESTAMP_FUTURE_TOLERANCE_MS,
            timestamp_max_age: DEFAULT_TIMESTAMP_MAX_AGE_MS,
            is_validator: true,
            authorities: Vec::new(),
            bootstrap_peers: Vec::new(),
            signing_seed: None,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl NodeConfig {
    /// Build from the process environment, falling back to defaults.
    /// Call `dotenvy::dotenv()` beforehand to pick up a `.env` file.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let listen_addr = env::var("P2P_LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.into());
        let node_id = env::var("NODE_ID")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| node_id_for(&listen_addr));

        let bootstrap_peers = env_list("BOOTSTRAP_PEERS")
            .iter()
            .filter_map(|entry| match entry.parse::<BootstrapPeer>() {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!("ignoring bootstrap peer: {}", e);
                    None
                }
            })
            .collect();

        Self {
            node_id,
            listen_addr,
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            remote_store_url: env::var("REMOTE_STORE_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            approval_policy: env_parse("APPROVAL_POLICY").unwrap_or(defaults.approval_policy),
            inactivity_timeout: env_parse("INACTIVITY_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.inactivity_timeout),
            inactivity_sweep_interval: env_parse("INACTIVITY_SWEEP_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.inactivity_sweep_interval),
            heartbeat_interval: env_parse("HEARTBEAT_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_interval),
            registry_save_interval: env_parse("REGISTRY_SAVE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.registry_save_interval),
            timestamp_future_tolerance: env_parse("TIMESTAMP_FUTURE_TOLERANCE_MS")
                .unwrap_or(defaults.timestamp_future_tolerance),
            timestamp_max_age: env_parse("TIMESTAMP_MAX_AGE_MS")
                .unwrap_or(defaults.timestamp_max_age),
            is_validator: env_parse("IS_VALIDATOR").unwrap_or(defaults.is_validator),
            authorities: env_list("AUTHORITIES"),
            bootstrap_peers,
            signing_seed: env::var("VALIDATOR_SEED_HEX")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        }
    }

    /// Check every option; the node refuses to start when any option has an error.
    pub fn validate(&self) -> ConfigValidation {
        let mut report = ConfigValidation::default();

        if self.node_id.trim().is_empty() {
            report.error("NODE_ID", "must not be empty");
        }

        if self.listen_addr.parse::<SocketAddr>().is_err() {
            report.error(
                "P2P_LISTEN_ADDR",
                format!("'{}' is not a socket address", self.listen_addr),
            );
        }

        validate_data_dir(&self.data_dir, &mut report);

        for (option, d) in [
            ("INACTIVITY_TIMEOUT_SECS", self.inactivity_timeout),
            ("INACTIVITY_SWEEP_SECS", self.inactivity_sweep_interval),
            ("HEARTBEAT_INTERVAL_SECS", self.heartbeat_interval),
            ("REGISTRY_SAVE_SECS", self.registry_save_interval),
        ] {
            if d.is_zero() {
                report.error(option, "must be greater than zero");
            }
        }

        if self.timestamp_future_tolerance < 0 {
            report.error("TIMESTAMP_FUTURE_TOLERANCE_MS", "must not be negative");
        }
        if self.timestamp_max_age <= 0 {
            report.error("TIMESTAMP_MAX_AGE_MS", "must be positive");
        }

        match &self.signing_seed {
            Some(seed) if signing_key_from_hex(seed).is_none() => {
                report.error("VALIDATOR_SEED_HEX", "must be 32 bytes of hex");
            }
            Some(_) => info!("Block signing enabled"),
            None => report.warn(
                "VALIDATOR_SEED_HEX",
                "not set, sealed blocks will carry no signature",
            ),
        }

        match &self.remote_store_url {
            Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                report.error("REMOTE_STORE_URL", format!("'{}' must be http(s)", url));
            }
            Some(url) if url.starts_with("http://") => {
                report.warn("REMOTE_STORE_URL", format!("'{}' is not using TLS", url));
            }
            Some(_) => {}
            None => report.warn("REMOTE_STORE_URL", "not set, chain is persisted locally only"),
        }

        if self.is_validator && self.approval_policy == ApprovalPolicy::RequireApproval {
            info!("Registration requires admin approval");
        }

        report
    }
}

fn node_id_for(listen_addr: &str) -> String {
    match listen_addr.parse::<SocketAddr>() {
        Ok(addr) => generate_node_id(&addr.ip().to_string(), addr.port()),
        Err(_) => generate_node_id(listen_addr, 0),
    }
}

fn validate_data_dir(path: &std::path::Path, report: &mut ConfigValidation) {
    if path.exists() {
        if !path.is_dir() {
            report.error("DATA_DIR", format!("'{}' is not a directory", path.display()));
        }
        return;
    }
    match std::fs::create_dir_all(path) {
        Ok(()) => info!("Created data directory: {}", path.display()),
        Err(e) => report.error("DATA_DIR", format!("cannot create '{}': {}", path.display(), e)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IssueLevel {
    Warning,
    Error,
}

/// Findings from [`NodeConfig::validate`], keyed by the environment option they concern.
#[derive(Debug, Default)]
pub struct ConfigValidation {
    issues: BTreeMap<&'static str, Vec<(IssueLevel, String)>>,
}

impl ConfigValidation {
    fn warn(&mut self, option: &'static str, msg: impl Into<String>) {
        self.issues
            .entry(option)
            .or_default()
            .push((IssueLevel::Warning, msg.into()));
    }

    fn error(&mut self, option: &'static str, msg: impl Into<String>) {
        self.issues
            .entry(option)
            .or_default()
            .push((IssueLevel::Error, msg.into()));
    }

    pub fn is_valid(&self) -> bool {
        self.error_count() == 0
    }

    pub fn error_count(&self) -> usize {
        self.count(IssueLevel::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(IssueLevel::Warning)
    }

    fn count(&self, level: IssueLevel) -> usize {
        self.issues
            .values()
            .flatten()
            .filter(|(l, _)| *l == level)
            .count()
    }

    /// Options with at least one issue, worst level first.
    pub fn options(&self) -> Vec<(&'static str, IssueLevel)> {
        let mut out: Vec<_> = self
            .issues
            .iter()
            .filter_map(|(opt, list)| list.iter().map(|(l, _)| *l).max().map(|l| (*opt, l)))
            .collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        out
    }

    pub fn issues_for(&self, option: &str) -> &[(IssueLevel, String)] {
        self.issues.get(option).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Log one line per issue, prefixed with its option.
    pub fn log(&self) {
        for (option, list) in &self.issues {
            for (level, msg) in list {
                match level {
                    IssueLevel::Warning => warn!("config {}: {}", option, msg),
                    IssueLevel::Error => error!("config {}: {}", option, msg),
                }
            }
        }
        if self.issues.is_empty() {
            info!("Configuration validation passed");
        }
    }
}
