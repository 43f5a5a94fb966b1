//! configure-nerve: generate and install the nerve config for this host
//!
//! Run periodically. Every run rebuilds the registration document from
//! scratch, validates it with nerve, swaps it in and reloads or restarts
//! nerve when needed.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use nerve_tools::apply::{ApplyOutcome, ApplySettings, CommandSupervisor, ConfigApplier};
use nerve_tools::config::Config;
use nerve_tools::inventory::DirectoryInventory;
use nerve_tools::labels::LabelsDir;
use nerve_tools::mesh::resolve_ingress;
use nerve_tools::nerve::{assemble, collect_services, ClassWeights, FanOut, FanOutSettings, HostContext};
use nerve_tools::net;
use nerve_tools::topology::{FileTopology, ZkTopologyDir};

#[derive(Parser, Debug)]
#[command(name = "configure-nerve")]
#[command(about = "Generate, validate and apply the nerve registration config")]
struct Cli {
    /// Path to the nerve-tools settings file
    #[arg(short, long, env = "NERVE_TOOLS_CONFIG", default_value = "/etc/nerve/nerve-tools.toml")]
    config: PathBuf,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "nerve_tools=info")]
    log_level: String,

    /// Heartbeat file touched by nerve
    #[arg(long, env = "NERVE_HEARTBEAT_PATH")]
    heartbeat_path: Option<PathBuf>,

    /// Restart nerve when the heartbeat is older than this many seconds
    #[arg(long, env = "NERVE_HEARTBEAT_THRESHOLD")]
    heartbeat_threshold: Option<u64>,

    /// Live nerve config file
    #[arg(long, env = "NERVE_CONFIG_PATH")]
    nerve_config_path: Option<PathBuf>,

    /// Reload nerve with SIGHUP instead of restarting it
    #[arg(long, env = "NERVE_RELOAD_WITH_SIGHUP")]
    reload_with_sighup: bool,

    #[arg(long, env = "NERVE_PID_PATH")]
    nerve_pid_path: Option<PathBuf>,

    #[arg(long, env = "NERVE_EXECUTABLE_PATH")]
    nerve_executable_path: Option<PathBuf>,

    /// Primary nerve control command as a JSON list, e.g. '["service", "nerve"]'
    #[arg(long, env = "NERVE_COMMAND", value_parser = parse_command)]
    nerve_command: Option<Vec<String>>,

    /// Standby nerve control command as a JSON list
    #[arg(long, env = "NERVE_BACKUP_COMMAND", value_parser = parse_command)]
    nerve_backup_command: Option<Vec<String>>,

    /// Seconds to let a started nerve register before moving on
    #[arg(long, env = "NERVE_REGISTRATION_DELAY")]
    nerve_registration_delay_s: Option<u64>,

    #[arg(long, env = "ZK_TOPOLOGY_DIR")]
    zk_topology_dir: Option<PathBuf>,

    /// Location type ZooKeeper clusters are keyed by
    #[arg(long, env = "ZK_LOCATION_TYPE")]
    zk_location_type: Option<String>,

    #[arg(long, env = "ZK_CLUSTER_TYPE")]
    zk_cluster_type: Option<String>,

    #[arg(long, env = "HACHECK_PORT")]
    hacheck_port: Option<u16>,

    /// Weight advertised for statically configured services
    #[arg(long, env = "NERVE_WEIGHT")]
    weight: Option<u32>,

    #[arg(long, env = "NERVE_LABELS_DIR")]
    labels_dir: Option<PathBuf>,

    #[arg(long, env = "ENVOY_ADMIN_PORT")]
    envoy_admin_port: Option<u16>,

    #[arg(long, env = "NERVE_SERVICES_DIR")]
    services_dir: Option<PathBuf>,
}

fn parse_command(s: &str) -> Result<Vec<String>, String> {
    let command: Vec<String> = serde_json::from_str(s).map_err(|e| e.to_string())?;
    if command.is_empty() {
        return Err("command must not be empty".to_string());
    }
    Ok(command)
}

impl Cli {
    fn apply_overrides(self, config: &mut Config) {
        let nerve = &mut config.nerve;
        if let Some(path) = self.heartbeat_path {
            nerve.heartbeat_path = path;
        }
        if let Some(threshold) = self.heartbeat_threshold {
            nerve.heartbeat_threshold_s = threshold;
        }
        if let Some(path) = self.nerve_config_path {
            nerve.config_path = path;
        }
        if self.reload_with_sighup {
            nerve.reload_with_sighup = true;
        }
        if let Some(path) = self.nerve_pid_path {
            nerve.pid_path = path;
        }
        if let Some(path) = self.nerve_executable_path {
            nerve.executable_path = path;
        }
        if let Some(command) = self.nerve_command {
            nerve.command = command;
        }
        if let Some(command) = self.nerve_backup_command {
            nerve.backup_command = command;
        }
        if let Some(delay) = self.nerve_registration_delay_s {
            nerve.registration_delay_s = delay;
        }

        let registration = &mut config.registration;
        if let Some(dir) = self.zk_topology_dir {
            registration.zk_topology_dir = dir;
        }
        if let Some(location_type) = self.zk_location_type {
            registration.zk_location_type = location_type;
        }
        if let Some(cluster_type) = self.zk_cluster_type {
            registration.zk_cluster_type = cluster_type;
        }
        if let Some(port) = self.hacheck_port {
            registration.hacheck_port = port;
        }
        if let Some(weight) = self.weight {
            registration.weight = weight;
        }
        if let Some(dir) = self.labels_dir {
            registration.labels_dir = dir;
        }

        if let Some(port) = self.envoy_admin_port {
            config.mesh.admin_port = port;
        }
        if let Some(dir) = self.services_dir {
            config.inventory.services_dir = dir;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(cli.log_level.parse()?),
        )
        .init();

    info!("Config file: {:?}", cli.config);
    let mut config = Config::load(&cli.config)?;
    cli.apply_overrides(&mut config);

    let instance_id = net::hostname()?;
    let host_ip = net::host_ip()?;
    info!(%instance_id, %host_ip, "Generating nerve config");

    let topology = FileTopology::load(
        config.topology.etc_dir.clone(),
        &config.topology.location_mapping,
        config.topology.type_order.clone(),
    )?;
    let zookeeper = ZkTopologyDir::new(config.registration.zk_topology_dir.clone());
    let labels = LabelsDir::new(config.registration.labels_dir.clone());
    let inventory = DirectoryInventory::new(config.inventory.services_dir.clone());

    let ingress = resolve_ingress(
        config.mesh.admin_port,
        Duration::from_secs(config.mesh.admin_timeout_s),
    )
    .await;

    let groups = collect_services(
        &inventory,
        ClassWeights {
            static_weight: config.registration.weight,
            orchestrated_weight: config.registration.orchestrated_weight,
        },
    );
    let settings = FanOutSettings::from(&config.registration);
    let fan_out = FanOut::new(&topology, &zookeeper, &labels, &settings);
    let document = assemble(
        &fan_out,
        &groups,
        &HostContext {
            instance_id,
            heartbeat_path: config.nerve.heartbeat_path.display().to_string(),
            host_ip: &host_ip,
            ingress: &ingress,
        },
    );

    let supervisor = CommandSupervisor::new(
        config.nerve.executable_path.clone(),
        config.nerve.command.clone(),
        config.nerve.backup_command.clone(),
    );
    let applier = ConfigApplier::new(ApplySettings::from(&config.nerve), &supervisor);

    match applier.apply(&document).await? {
        ApplyOutcome::Rejected => {
            warn!("nerve rejected the generated config, keeping the previous one")
        }
        outcome => info!(?outcome, "nerve config applied"),
    }

    Ok(())
}
