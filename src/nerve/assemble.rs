//! Whole-host configuration assembly

use tracing::{debug, info, warn};

use super::fanout::{FanOut, ServiceInstance};
use super::model::NerveConfiguration;
use crate::inventory::{NamedService, ServiceClass, ServiceSource};
use crate::mesh::IngressMapping;

/// Services of one class together with the weight they advertise at
#[derive(Debug, Clone)]
pub struct ServiceGroup {
    pub class: ServiceClass,
    pub weight: u32,
    pub services: Vec<NamedService>,
}

/// Default weight for each service class
#[derive(Debug, Clone, Copy)]
pub struct ClassWeights {
    pub static_weight: u32,
    pub orchestrated_weight: u32,
}

impl ClassWeights {
    pub fn weight(&self, class: ServiceClass) -> u32 {
        match class {
            ServiceClass::Static => self.static_weight,
            ServiceClass::Orchestrated => self.orchestrated_weight,
        }
    }
}

/// Enumerate every class from the inventory; a failing class contributes nothing
pub fn collect_services(source: &dyn ServiceSource, weights: ClassWeights) -> Vec<ServiceGroup> {
    ServiceClass::ALL
        .iter()
        .map(|&class| {
            let services = source.services(class).unwrap_or_else(|e| {
                warn!(class = class.dir_name(), error = %e, "Unable to list services");
                Vec::new()
            });
            ServiceGroup {
                class,
                weight: weights.weight(class),
                services,
            }
        })
        .collect()
}

/// Inputs that are the same for every service on the host
pub struct HostContext<'a> {
    pub instance_id: String,
    pub heartbeat_path: String,
    pub host_ip: &'a str,
    pub ingress: &'a IngressMapping,
}

/// Fan out every service and merge the result into one document
pub fn assemble(
    fan_out: &FanOut<'_>,
    groups: &[ServiceGroup],
    host: &HostContext<'_>,
) -> NerveConfiguration {
    let mut config = NerveConfiguration::new(host.instance_id.clone(), host.heartbeat_path.clone());

    for group in groups {
        for (name, descriptor) in &group.services {
            let mesh = host.ingress.mesh_descriptor(name, descriptor, host.host_ip);
            let entries = fan_out.entries(&ServiceInstance {
                name,
                descriptor,
                host_ip: host.host_ip,
                weight: group.weight,
                mesh: mesh.as_ref(),
            });
            debug!(
                service = %name,
                class = group.class.dir_name(),
                entries = entries.len(),
                mesh = mesh.is_some(),
                "Generated registrations"
            );
            config.services.extend(entries);
        }
    }

    info!(
        services = groups.iter().map(|g| g.services.len()).sum::<usize>(),
        entries = config.services.len(),
        "Assembled nerve configuration"
    );
    config
}
