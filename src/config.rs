//! Tool configuration
//!
//! Loaded from a TOML file when present, otherwise built from defaults.
//! Command-line flags are applied on top by the binaries.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub nerve: NerveConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub mesh: MeshConfig,
}

/// Where the nerve daemon lives and how it is driven
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NerveConfig {
    /// Live configuration file read by nerve
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,

    /// Heartbeat file touched by a healthy nerve
    #[serde(default = "default_heartbeat_path")]
    pub heartbeat_path: PathBuf,

    /// Restart nerve when the heartbeat is older than this many seconds
    #[serde(default = "default_heartbeat_threshold")]
    pub heartbeat_threshold_s: u64,

    /// Reload with SIGHUP instead of a full restart when only the config changed
    #[serde(default)]
    pub reload_with_sighup: bool,

    #[serde(default = "default_pid_path")]
    pub pid_path: PathBuf,

    #[serde(default = "default_executable_path")]
    pub executable_path: PathBuf,

    /// Command controlling the primary nerve, `start`/`stop` is appended
    #[serde(default = "default_command")]
    pub command: Vec<String>,

    /// Command controlling the standby nerve
    #[serde(default = "default_backup_command")]
    pub backup_command: Vec<String>,

    /// Seconds to let a freshly started nerve register its services
    #[serde(default = "default_registration_delay")]
    pub registration_delay_s: u64,
}

impl NerveConfig {
    pub fn heartbeat_threshold(&self) -> Duration {
        Duration::from_secs(self.heartbeat_threshold_s)
    }

    pub fn registration_delay(&self) -> Duration {
        Duration::from_secs(self.registration_delay_s)
    }
}

impl Default for NerveConfig {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            heartbeat_path: default_heartbeat_path(),
            heartbeat_threshold_s: default_heartbeat_threshold(),
            reload_with_sighup: false,
            pid_path: default_pid_path(),
            executable_path: default_executable_path(),
            command: default_command(),
            backup_command: default_backup_command(),
            registration_delay_s: default_registration_delay(),
        }
    }
}

/// How registration entries are laid out in ZooKeeper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    #[serde(default = "default_zk_topology_dir")]
    pub zk_topology_dir: PathBuf,

    /// Location type the ZooKeeper clusters live at
    #[serde(default = "default_zk_location_type")]
    pub zk_location_type: String,

    #[serde(default = "default_zk_cluster_type")]
    pub zk_cluster_type: String,

    /// Port of the hacheck health-check proxy
    #[serde(default = "default_hacheck_port")]
    pub hacheck_port: u16,

    /// Weight for statically configured services
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Weight for orchestrator-managed services
    #[serde(default = "default_orchestrated_weight")]
    pub orchestrated_weight: u32,

    #[serde(default = "default_labels_dir")]
    pub labels_dir: PathBuf,

    #[serde(default = "default_legacy_root")]
    pub legacy_root: String,

    #[serde(default = "default_global_root")]
    pub global_root: String,

    #[serde(default = "default_mesh_root")]
    pub mesh_root: String,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            zk_topology_dir: default_zk_topology_dir(),
            zk_location_type: default_zk_location_type(),
            zk_cluster_type: default_zk_cluster_type(),
            hacheck_port: default_hacheck_port(),
            weight: default_weight(),
            orchestrated_weight: default_orchestrated_weight(),
            labels_dir: default_labels_dir(),
            legacy_root: default_legacy_root(),
            global_root: default_global_root(),
            mesh_root: default_mesh_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Directory holding one file per location type with the current location
    #[serde(default = "default_etc_dir")]
    pub etc_dir: PathBuf,

    #[serde(default = "default_location_mapping")]
    pub location_mapping: PathBuf,

    /// Location types, finest first
    #[serde(default = "default_type_order")]
    pub type_order: Vec<String>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            etc_dir: default_etc_dir(),
            location_mapping: default_location_mapping(),
            type_order: default_type_order(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    #[serde(default = "default_services_dir")]
    pub services_dir: PathBuf,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            services_dir: default_services_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Envoy admin port queried for ingress listeners
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,

    #[serde(default = "default_admin_timeout")]
    pub admin_timeout_s: u64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            admin_port: default_admin_port(),
            admin_timeout_s: default_admin_timeout(),
        }
    }
}

impl Config {
    /// Load the config file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid config: {0}")]
    Parse(String),
}

// Defaults
fn default_config_path() -> PathBuf { PathBuf::from("/etc/nerve/nerve.conf.json") }
fn default_heartbeat_path() -> PathBuf { PathBuf::from("/var/run/nerve/heartbeat") }
fn default_heartbeat_threshold() -> u64 { 60 }
fn default_pid_path() -> PathBuf { PathBuf::from("/var/run/nerve.pid") }
fn default_executable_path() -> PathBuf { PathBuf::from("/usr/bin/nerve") }
fn default_command() -> Vec<String> { vec!["service".to_string(), "nerve".to_string()] }
fn default_backup_command() -> Vec<String> {
    vec!["service".to_string(), "nerve-backup".to_string()]
}
fn default_registration_delay() -> u64 { 30 }
fn default_zk_topology_dir() -> PathBuf { PathBuf::from("/nail/etc/zookeeper_discovery") }
fn default_zk_location_type() -> String { "superregion".to_string() }
fn default_zk_cluster_type() -> String { "infrastructure".to_string() }
fn default_hacheck_port() -> u16 { 6666 }
fn default_orchestrated_weight() -> u32 { 10 }
fn default_labels_dir() -> PathBuf { PathBuf::from("/etc/nerve/labels.d/") }
fn default_legacy_root() -> String { "nerve".to_string() }
fn default_global_root() -> String { "smartstack/global".to_string() }
fn default_mesh_root() -> String { "envoy/global".to_string() }
fn default_etc_dir() -> PathBuf { PathBuf::from("/nail/etc") }
fn default_location_mapping() -> PathBuf { PathBuf::from("/nail/etc/location_mapping.yaml") }
fn default_type_order() -> Vec<String> {
    ["habitat", "region", "superregion", "ecosystem"]
        .iter()
        .map(|t| t.to_string())
        .collect()
}
fn default_services_dir() -> PathBuf { PathBuf::from("/etc/nerve/services.d") }
fn default_admin_port() -> u16 { 9901 }
fn default_admin_timeout() -> u64 { 5 }

/// Advertised weight: one unit per CPU, never below 10
pub fn default_weight() -> u32 {
    (num_cpus::get() as u32).max(10)
}
