//! Envoy ingress listener discovery
//!
//! The mesh control plane creates one ingress listener per locally running
//! service instance, named `<service>.<ip>.<port>.ingress_listener`. Nerve
//! needs the listener's own port to register the service as reachable
//! through the mesh.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::descriptor::ServiceDescriptor;

const LISTENER_SUFFIX: &str = ".ingress_listener";

/// Identity of a service instance as the mesh sees it
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IngressKey {
    pub service: String,
    pub ip: String,
    pub port: u16,
}

impl IngressKey {
    pub fn new(service: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            service: service.into(),
            ip: ip.into(),
            port,
        }
    }

    /// Parse a listener name, `None` for anything that is not an ingress listener
    pub fn from_listener_name(name: &str) -> Option<Self> {
        let rest = name.strip_suffix(LISTENER_SUFFIX)?;
        if rest.chars().any(char::is_whitespace) {
            return None;
        }
        let parts: Vec<&str> = rest.split('.').collect();
        // service.namespace + four octets + port
        if parts.len() < 7 {
            return None;
        }
        let n = parts.len();
        let port: u16 = parts[n - 1].parse().ok()?;
        let ip: Ipv4Addr = parts[n - 5..n - 1].join(".").parse().ok()?;
        let service_parts = &parts[..n - 5];
        if service_parts.iter().any(|p| p.is_empty()) {
            return None;
        }
        Some(Self::new(service_parts.join("."), ip.to_string(), port))
    }
}

/// Ingress port per service instance, rebuilt on every run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngressMapping {
    listeners: BTreeMap<IngressKey, u16>,
}

impl IngressMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: IngressKey, ingress_port: u16) {
        self.listeners.insert(key, ingress_port);
    }

    pub fn get(&self, key: &IngressKey) -> Option<u16> {
        self.listeners.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Build from the admin API's `/listeners?format=json` body
    ///
    /// Each listener is read on its own; a malformed one is skipped
    /// without affecting the rest.
    pub fn from_admin_response(body: &ListenersResponse) -> Self {
        let mut mapping = Self::new();
        for listener in &body.listener_statuses {
            let Some(key) = listener
                .get("name")
                .and_then(Value::as_str)
                .and_then(IngressKey::from_listener_name)
            else {
                continue;
            };
            match listener_port(listener) {
                Some(port) => mapping.insert(key, port),
                None => debug!(?key, "Ingress listener has no usable port, skipping"),
            }
        }
        mapping
    }

    /// The descriptor to register through the mesh, if this instance has an ingress
    ///
    /// Port and health-check port move to the ingress port, the instance is
    /// advertised on the host address the listener binds, and the health
    /// check carries a `Host` header because envoy routes on it.
    pub fn mesh_descriptor(
        &self,
        service_name: &str,
        descriptor: &ServiceDescriptor,
        host_ip: &str,
    ) -> Option<ServiceDescriptor> {
        let port = descriptor.registrable_port()?;
        let key = IngressKey::new(service_name, descriptor.bind_host(host_ip), port);
        let ingress_port = self.get(&key)?;

        let mut headers = descriptor.extra_healthcheck_headers.clone();
        headers.insert("Host".to_string(), service_name.to_string());

        Some(ServiceDescriptor {
            port: Some(ingress_port),
            healthcheck_port: Some(ingress_port),
            service_ip: Some(host_ip.to_string()),
            extra_healthcheck_headers: headers,
            ..descriptor.clone()
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListenersResponse {
    #[serde(default)]
    pub listener_statuses: Vec<Value>,
}

/// `local_address.socket_address.port_value`, as a number or numeric string
fn listener_port(listener: &Value) -> Option<u16> {
    let port = listener
        .get("local_address")?
        .get("socket_address")?
        .get("port_value")?;
    match port {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Query the local envoy admin API
///
/// Any failure is logged and yields an empty mapping so that config
/// generation carries on without mesh entries.
pub async fn resolve_ingress(admin_port: u16, timeout: Duration) -> IngressMapping {
    let url = format!("http://localhost:{}/listeners?format=json", admin_port);
    match fetch_listeners(&url, timeout).await {
        Ok(body) => {
            let mapping = IngressMapping::from_admin_response(&body);
            debug!(listeners = mapping.len(), "Resolved envoy ingress listeners");
            mapping
        }
        Err(e) => {
            warn!("Unable to get envoy listeners: {}", e);
            IngressMapping::new()
        }
    }
}

async fn fetch_listeners(url: &str, timeout: Duration) -> Result<ListenersResponse, reqwest::Error> {
    reqwest::Client::new()
        .get(url)
        .timeout(timeout)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
}
