//! Configuration parsing and validation.
//!
//! DKV configuration is loaded from TOML files with CLI overrides.
//! Sections mirror the runtime components: node identity, storage engine,
//! replication pipeline, cluster membership, and discovery.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Role a DKV process runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Raft member serving consensus-backed writes and the change feed.
    Master,
    /// Asynchronous replica tailing a master's change log.
    Slave,
    /// Discovery registry node.
    Discovery,
    /// Single-node master with no peers (development and tests).
    Standalone,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Slave => write!(f, "slave"),
            Self::Discovery => write!(f, "discovery"),
            Self::Standalone => write!(f, "standalone"),
        }
    }
}

/// Top-level DKV configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node identity and region placement.
    pub node: NodeConfig,

    /// Storage engine configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Replication pipeline tuning.
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Cluster membership configuration.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Discovery service configuration.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Logging configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Node identity and region placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// RPC bind address; mirrored as RegionInfo.node_address.
    pub listen_addr: String,

    /// Role this process runs as.
    pub role: NodeRole,

    /// Data center identifier.
    #[serde(default = "default_dc_id")]
    pub dc_id: String,

    /// Logical database this node serves.
    #[serde(default = "default_database")]
    pub database: String,

    /// Shard (vBucket) this node serves.
    #[serde(default)]
    pub vbucket: u32,
}

/// Storage engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Engine variant: "durable" or "memory".
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Directory owning the engine's on-disk files.
    #[serde(default = "default_db_folder")]
    pub db_folder: String,

    /// Create `db_folder` if it does not exist.
    #[serde(default = "default_true")]
    pub create_db_folder_if_missing: bool,

    /// Block cache size hint in bytes.
    #[serde(default = "default_cache_size")]
    pub cache_size: u64,

    /// Number of recent change records retained for LoadChanges.
    #[serde(default = "default_retained_changes")]
    pub retained_changes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            db_folder: default_db_folder(),
            create_db_folder_if_missing: true,
            cache_size: default_cache_size(),
            retained_changes: default_retained_changes(),
        }
    }
}

/// Replication pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Maximum change records fetched per GetChanges pull.
    #[serde(default = "default_max_changes_per_pull")]
    pub max_changes_per_pull: u32,

    /// Pull interval while caught up, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Lag bound B: maximum master-minus-applied gap for ACTIVE_SLAVE.
    #[serde(default = "default_lag_bound")]
    pub lag_bound: u64,

    /// Seconds without a reachable master before self-demoting to INACTIVE.
    #[serde(default = "default_master_unreachable_secs")]
    pub master_unreachable_secs: u64,

    /// Shared path used for snapshot bootstrap when the change log has
    /// been truncated past the slave's position. Bootstrap is skipped
    /// (and the slave stays INACTIVE) when unset.
    #[serde(default)]
    pub bootstrap_path: Option<String>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_changes_per_pull: default_max_changes_per_pull(),
            poll_interval_ms: default_poll_interval_ms(),
            lag_bound: default_lag_bound(),
            master_unreachable_secs: default_master_unreachable_secs(),
            bootstrap_path: None,
        }
    }
}

/// Cluster membership configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Raft peer URLs for bootstrap, e.g. "http://n1:7071,http://n2:7071".
    /// Peers listed here are assumed to share this node's data center;
    /// cross-DC members use `peers` instead.
    #[serde(default)]
    pub nexus_cluster_url: String,

    /// This member's URL within the peer set.
    #[serde(default)]
    pub nexus_node_url: String,

    /// Cross-DC bootstrap members with explicit placement.
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

/// A bootstrap Raft member with its data center.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub url: String,
    pub dc_id: String,
}

/// Discovery service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Discovery service addresses heartbeats and lookups go to.
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Heartbeat emission interval in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Registry entry TTL in seconds; regions without a heartbeat for
    /// longer than this are omitted from GetClusterInfo.
    #[serde(default = "default_region_ttl_secs")]
    pub region_ttl_secs: u64,

    /// Client-side cluster-info cache TTL in milliseconds.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            region_ttl_secs: default_region_ttl_secs(),
            cache_ttl_ms: default_cache_ttl_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_dc_id() -> String {
    "dc-1".to_string()
}

fn default_database() -> String {
    "default".to_string()
}

fn default_engine() -> String {
    "durable".to_string()
}

fn default_db_folder() -> String {
    "data".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cache_size() -> u64 {
    128 * 1024 * 1024
}

fn default_retained_changes() -> usize {
    4096
}

fn default_max_changes_per_pull() -> u32 {
    256
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_lag_bound() -> u64 {
    1_024
}

fn default_master_unreachable_secs() -> u64 {
    30
}

fn default_heartbeat_interval_ms() -> u64 {
    2_000
}

fn default_region_ttl_secs() -> u64 {
    10
}

fn default_cache_ttl_ms() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref listen_addr) = overrides.listen_addr {
            self.node.listen_addr = listen_addr.clone();
        }
        if let Some(ref db_folder) = overrides.db_folder {
            self.storage.db_folder = db_folder.clone();
        }
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref endpoints) = overrides.discovery_endpoints {
            self.discovery.endpoints = endpoints.clone();
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_node()?;
        self.validate_storage()?;
        self.validate_replication()?;
        self.validate_cluster()?;
        self.validate_discovery()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_cluster(&self) -> Result<()> {
        let has_peers =
            !self.cluster.nexus_cluster_url.is_empty() || !self.cluster.peers.is_empty();
        if has_peers && self.cluster.nexus_node_url.is_empty() {
            anyhow::bail!("cluster.nexus_node_url required when bootstrap peers are configured");
        }
        Ok(())
    }

    fn validate_node(&self) -> Result<()> {
        if self.node.listen_addr.is_empty() {
            anyhow::bail!("node.listen_addr must be set");
        }
        self.node
            .listen_addr
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("invalid node.listen_addr: {}", self.node.listen_addr))?;
        if self.node.database.is_empty() {
            anyhow::bail!("node.database must be non-empty");
        }
        Ok(())
    }

    fn validate_storage(&self) -> Result<()> {
        if self.storage.engine != "durable" && self.storage.engine != "memory" {
            anyhow::bail!(
                "storage.engine must be 'durable' or 'memory', got: {}",
                self.storage.engine
            );
        }
        if self.storage.retained_changes == 0 {
            anyhow::bail!("storage.retained_changes must be > 0");
        }
        Ok(())
    }

    fn validate_replication(&self) -> Result<()> {
        if self.replication.max_changes_per_pull == 0 {
            anyhow::bail!("replication.max_changes_per_pull must be > 0");
        }
        if self.replication.poll_interval_ms == 0 {
            anyhow::bail!("replication.poll_interval_ms must be > 0");
        }
        if self.node.role == NodeRole::Slave && self.discovery.endpoints.is_empty() {
            anyhow::bail!("slave nodes require at least one discovery endpoint");
        }
        Ok(())
    }

    fn validate_discovery(&self) -> Result<()> {
        if self.discovery.heartbeat_interval_ms == 0 {
            anyhow::bail!("discovery.heartbeat_interval_ms must be > 0");
        }
        if self.discovery.region_ttl_secs == 0 {
            anyhow::bail!("discovery.region_ttl_secs must be > 0");
        }
        // Heartbeats slower than the registry TTL guarantee flapping.
        if self.discovery.heartbeat_interval_ms / 1000 >= self.discovery.region_ttl_secs {
            anyhow::bail!(
                "discovery.heartbeat_interval_ms ({}) must be well below region_ttl_secs ({})",
                self.discovery.heartbeat_interval_ms,
                self.discovery.region_ttl_secs
            );
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override the RPC bind address.
    pub listen_addr: Option<String>,
    /// Override the storage directory.
    pub db_folder: Option<String>,
    /// Override the log level.
    pub log_level: Option<String>,
    /// Override the discovery endpoints.
    pub discovery_endpoints: Option<Vec<String>>,
}
