//! Settings file loading integration tests

use std::fs;
use std::path::PathBuf;

use nerve_tools::config::{default_weight, Config};

#[test]
fn test_config_with_all_sections() {
    let toml_str = r#"
[nerve]
config_path = "/srv/nerve/nerve.conf.json"
heartbeat_path = "/srv/nerve/heartbeat"
heartbeat_threshold_s = 120
reload_with_sighup = true
pid_path = "/srv/nerve/nerve.pid"
executable_path = "/opt/nerve/bin/nerve"
command = ["systemctl", "nerve"]
backup_command = ["systemctl", "nerve-backup"]
registration_delay_s = 10

[registration]
zk_topology_dir = "/srv/zk"
zk_location_type = "region"
zk_cluster_type = "discovery"
hacheck_port = 6667
weight = 24
orchestrated_weight = 5
labels_dir = "/srv/labels.d"
legacy_root = "legacy"
global_root = "discovery/global"
mesh_root = "mesh/global"

[topology]
etc_dir = "/srv/etc"
location_mapping = "/srv/etc/mapping.yaml"
type_order = ["rack", "datacenter"]

[inventory]
services_dir = "/srv/services.d"

[mesh]
admin_port = 19000
admin_timeout_s = 2
"#;

    let config = Config::from_toml(toml_str).expect("valid config");

    assert_eq!(config.nerve.config_path, PathBuf::from("/srv/nerve/nerve.conf.json"));
    assert_eq!(config.nerve.heartbeat_threshold_s, 120);
    assert!(config.nerve.reload_with_sighup);
    assert_eq!(config.nerve.command, vec!["systemctl", "nerve"]);
    assert_eq!(config.registration.zk_location_type, "region");
    assert_eq!(config.registration.weight, 24);
    assert_eq!(config.registration.orchestrated_weight, 5);
    assert_eq!(config.registration.mesh_root, "mesh/global");
    assert_eq!(config.topology.type_order, vec!["rack", "datacenter"]);
    assert_eq!(config.inventory.services_dir, PathBuf::from("/srv/services.d"));
    assert_eq!(config.mesh.admin_port, 19000);
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("nerve-tools.toml");
    fs::write(&path, "[registration]\nhacheck_port = 7777\n").unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.registration.hacheck_port, 7777);
    assert_eq!(config.registration.weight, default_weight());
    assert_eq!(config.registration.legacy_root, "nerve");
}

#[test]
fn test_invalid_file_is_an_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("nerve-tools.toml");
    fs::write(&path, "[registration]\nhacheck_port = \"not a port\"\n").unwrap();

    assert!(Config::load(&path).is_err());
}
