//! Per-service registration fan-out
//!
//! One service descriptor turns into many nerve entries:
//!
//! - a legacy entry per (location, type, cluster) at `/<legacy>/<type>:<loc>/<svc>`
//! - a global entry per cluster at `/<global>/<svc>`, labelled with every
//!   location it was registered for
//! - a mesh entry per cluster at `/<mesh>/<svc>` when envoy has an ingress
//!   listener for the instance
//!
//! Locations come from the descriptor's `advertise` types plus any
//! `extra_advertise` rule whose source matches this host. Each location is
//! converted to the ZooKeeper location type to find the clusters to write to.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use super::model::{HealthCheck, RegistrationEntry};
use crate::config::RegistrationConfig;
use crate::descriptor::{LocationPair, ServiceDescriptor};
use crate::labels::{LabelSource, Labels};
use crate::topology::{LocationTopology, ZookeeperDirectory};

/// Settings shared by every fan-out in a generation pass
#[derive(Debug, Clone)]
pub struct FanOutSettings {
    pub hacheck_port: u16,
    pub zk_location_type: String,
    pub zk_cluster_type: String,
    pub legacy_root: String,
    pub global_root: String,
    pub mesh_root: String,
}

impl From<&RegistrationConfig> for FanOutSettings {
    fn from(config: &RegistrationConfig) -> Self {
        Self {
            hacheck_port: config.hacheck_port,
            zk_location_type: config.zk_location_type.clone(),
            zk_cluster_type: config.zk_cluster_type.clone(),
            legacy_root: config.legacy_root.clone(),
            global_root: config.global_root.clone(),
            mesh_root: config.mesh_root.clone(),
        }
    }
}

/// One service instance to fan out
#[derive(Debug, Clone, Copy)]
pub struct ServiceInstance<'a> {
    pub name: &'a str,
    pub descriptor: &'a ServiceDescriptor,
    pub host_ip: &'a str,
    pub weight: u32,
    /// Ingress-rewritten descriptor when the instance is reachable through the mesh
    pub mesh: Option<&'a ServiceDescriptor>,
}

pub struct FanOut<'a> {
    topology: &'a dyn LocationTopology,
    zookeeper: &'a dyn ZookeeperDirectory,
    labels: &'a dyn LabelSource,
    settings: &'a FanOutSettings,
}

/// A cluster the service registers in, with the locations that led there
struct ClusterRegistration {
    zk_hosts: Vec<String>,
    locations: BTreeSet<LocationPair>,
}

impl<'a> FanOut<'a> {
    pub fn new(
        topology: &'a dyn LocationTopology,
        zookeeper: &'a dyn ZookeeperDirectory,
        labels: &'a dyn LabelSource,
        settings: &'a FanOutSettings,
    ) -> Self {
        Self {
            topology,
            zookeeper,
            labels,
            settings,
        }
    }

    /// Every nerve entry for one service instance, keyed by entry name
    pub fn entries(&self, instance: &ServiceInstance<'_>) -> BTreeMap<String, RegistrationEntry> {
        let mut entries = BTreeMap::new();
        let descriptor = instance.descriptor;
        let Some(port) = descriptor.registrable_port() else {
            return entries;
        };
        if descriptor.advertise.is_empty() {
            return entries;
        }

        let service = instance.name;
        let ip = descriptor.bind_host(instance.host_ip);
        let timeout = descriptor.healthcheck_timeout_s();
        let check = self.service_check(service, descriptor, port);

        let mut clusters: BTreeMap<String, ClusterRegistration> = BTreeMap::new();
        for pair in self.registration_locations(descriptor) {
            for zk_location in self.clusters_for(&pair) {
                let zk_hosts = match self
                    .zookeeper
                    .hosts(&self.settings.zk_cluster_type, &zk_location)
                {
                    Ok(hosts) => hosts,
                    Err(e) => {
                        debug!(service, location = %pair, zk_location = %zk_location, error = %e, "No zookeeper topology, skipping");
                        continue;
                    }
                };

                let key = format!(
                    "{}.{}.{}.{}.{}.new",
                    service, zk_location, pair, ip, port
                );
                entries.insert(
                    key,
                    RegistrationEntry {
                        port,
                        host: ip.to_string(),
                        zk_hosts: zk_hosts.clone(),
                        zk_path: zk_path(&self.settings.legacy_root, &format!("{}/{}", pair, service)),
                        check_interval: timeout + 1.0,
                        checks: vec![check.clone()],
                        labels: None,
                        weight: instance.weight,
                    },
                );

                clusters
                    .entry(zk_location)
                    .or_insert_with(|| ClusterRegistration {
                        zk_hosts,
                        locations: BTreeSet::new(),
                    })
                    .locations
                    .insert(pair.clone());
            }
        }

        let custom_labels = self.labels.labels(service, port);
        let deploy_labels = deploy_labels(descriptor);
        let mesh_check = instance
            .mesh
            .map(|mesh| self.mesh_check(service, mesh, instance.host_ip));

        for (zk_location, cluster) in clusters {
            // Fresh label set per cluster, nothing leaks between clusters
            let mut labels = custom_labels.clone();
            // Synapse finds the servers advertised to it by `type:loc == ''`
            labels.extend(cluster.locations.iter().map(|pair| (pair.to_string(), String::new())));
            labels.extend(deploy_labels.clone());

            entries.insert(
                format!("{}.{}:{}.{}.v2.new", service, zk_location, ip, port),
                RegistrationEntry {
                    port,
                    host: ip.to_string(),
                    zk_hosts: cluster.zk_hosts.clone(),
                    zk_path: zk_path(&self.settings.global_root, service),
                    check_interval: timeout + 1.0,
                    checks: vec![check.clone()],
                    labels: Some(labels.clone()),
                    weight: instance.weight,
                },
            );

            if let (Some(mesh), Some(mesh_check)) = (instance.mesh, &mesh_check) {
                let mesh_port = mesh.registrable_port().unwrap_or(port);
                entries.insert(
                    format!("{}.{}:{}.{}", service, zk_location, ip, port),
                    RegistrationEntry {
                        port: mesh_port,
                        host: mesh.bind_host(instance.host_ip).to_string(),
                        zk_hosts: cluster.zk_hosts,
                        zk_path: zk_path(&self.settings.mesh_root, service),
                        check_interval: mesh.healthcheck_timeout_s() + 1.0,
                        checks: vec![mesh_check.clone()],
                        labels: Some(labels),
                        weight: instance.weight,
                    },
                );
            }
        }

        entries
    }

    /// Every (location, type) this host should register the service at
    pub fn registration_locations(&self, descriptor: &ServiceDescriptor) -> BTreeSet<LocationPair> {
        let mut locations = BTreeSet::new();

        for typ in &descriptor.advertise {
            match self.topology.current_location(typ) {
                Ok(loc) => {
                    locations.insert(LocationPair::new(loc, typ.clone()));
                }
                Err(e) => warn!(location_type = %typ, error = %e, "Cannot advertise at unknown location"),
            }
        }

        for rule in descriptor.extra_advertise_rules() {
            let here = self.topology.current_location(&rule.src.location_type).ok();
            if here.as_deref() != Some(rule.src.location.as_str()) {
                continue;
            }

            for typ in &descriptor.advertise {
                // No upcasts, they would expose the service to more hosts than intended
                match self.topology.compare_types(&rule.dst.location_type, typ) {
                    Ok(Ordering::Less | Ordering::Equal) => {}
                    Ok(Ordering::Greater) => continue,
                    Err(e) => {
                        warn!(rule = %rule.dst, error = %e, "Cannot compare location types");
                        continue;
                    }
                }
                let converted = self
                    .topology
                    .convert_location(&rule.dst.location, &rule.dst.location_type, typ)
                    .unwrap_or_default();
                locations.extend(converted.into_iter().map(|loc| LocationPair::new(loc, typ.clone())));
            }
        }

        locations
    }

    fn clusters_for(&self, pair: &LocationPair) -> Vec<String> {
        self.topology
            .convert_location(&pair.location, &pair.location_type, &self.settings.zk_location_type)
            .unwrap_or_else(|e| {
                debug!(location = %pair, error = %e, "Cannot map location to a zookeeper location");
                Vec::new()
            })
    }

    fn service_check(&self, service: &str, descriptor: &ServiceDescriptor, port: u16) -> HealthCheck {
        let uri = hacheck_uri(
            descriptor.healthcheck_mode(),
            service,
            descriptor.healthcheck_port.unwrap_or(port),
            descriptor.healthcheck_uri(),
        );
        HealthCheck {
            expect: descriptor.healthcheck_body_expect.clone(),
            ..HealthCheck::hacheck(
                descriptor.hacheck_ip(),
                self.settings.hacheck_port,
                uri,
                descriptor.healthcheck_timeout_s(),
                descriptor.extra_healthcheck_headers.clone(),
            )
        }
    }

    /// hacheck checks through envoy, which terminates TLS for http services
    fn mesh_check(&self, service: &str, mesh: &ServiceDescriptor, host_ip: &str) -> HealthCheck {
        let mode = match mesh.healthcheck_mode() {
            "http" => "https",
            other => other,
        };
        let port = mesh.healthcheck_port.or(mesh.registrable_port()).unwrap_or_default();
        HealthCheck::hacheck(
            host_ip,
            self.settings.hacheck_port,
            hacheck_uri(mode, service, port, mesh.healthcheck_uri()),
            mesh.healthcheck_timeout_s(),
            mesh.extra_healthcheck_headers.clone(),
        )
    }
}

/// `/<mode>/<service>/<port>/<uri>`, the path hacheck dispatches on
pub fn hacheck_uri(mode: &str, service: &str, port: u16, uri: &str) -> String {
    format!("/{}/{}/{}/{}", mode, service, port, uri.trim_start_matches('/'))
}

fn zk_path(root: &str, rest: &str) -> String {
    format!("/{}/{}", root.trim_matches('/'), rest)
}

/// Labels envoy uses for canary routing
fn deploy_labels(descriptor: &ServiceDescriptor) -> Labels {
    let mut labels = Labels::new();
    if let Some(group) = descriptor.deploy_group.as_ref().filter(|g| !g.is_empty()) {
        labels.insert("deploy_group".to_string(), group.clone());
    }
    if let Some(instance) = descriptor.paasta_instance.as_ref().filter(|i| !i.is_empty()) {
        labels.insert("paasta_instance".to_string(), instance.clone());
    }
    labels
}
