//! Per-service registration input
//!
//! A `ServiceDescriptor` is what the service inventory knows about one
//! locally running service namespace: where it listens, how to health
//! check it and where it should be advertised.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_MODE: &str = "http";
pub const DEFAULT_HEALTHCHECK_URI: &str = "/status";
pub const DEFAULT_HEALTHCHECK_TIMEOUT_S: f64 = 1.0;
pub const DEFAULT_HACHECK_IP: &str = "127.0.0.1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Port the service listens on; absent or 0 means nothing to register
    #[serde(default)]
    pub port: Option<u16>,

    /// Host hacheck is reached on; set for pods with a hacheck sidecar
    #[serde(default)]
    pub hacheck_ip: Option<String>,

    /// Address the service is bound to when it is not the host address
    #[serde(default)]
    pub service_ip: Option<String>,

    #[serde(default)]
    pub mode: Option<String>,

    #[serde(default)]
    pub healthcheck_timeout_s: Option<f64>,

    #[serde(default)]
    pub healthcheck_port: Option<u16>,

    #[serde(default)]
    pub healthcheck_uri: Option<String>,

    #[serde(default)]
    pub healthcheck_mode: Option<String>,

    /// Location types to advertise at
    #[serde(default = "default_advertise")]
    pub advertise: Vec<String>,

    /// `("type:location", "type:location")` source → destination rules
    #[serde(default)]
    pub extra_advertise: Vec<(String, String)>,

    #[serde(default)]
    pub extra_healthcheck_headers: BTreeMap<String, String>,

    #[serde(default)]
    pub healthcheck_body_expect: Option<String>,

    #[serde(default)]
    pub deploy_group: Option<String>,

    #[serde(default)]
    pub paasta_instance: Option<String>,
}

fn default_advertise() -> Vec<String> {
    vec!["region".to_string()]
}

impl Default for ServiceDescriptor {
    fn default() -> Self {
        Self {
            port: None,
            hacheck_ip: None,
            service_ip: None,
            mode: None,
            healthcheck_timeout_s: None,
            healthcheck_port: None,
            healthcheck_uri: None,
            healthcheck_mode: None,
            advertise: default_advertise(),
            extra_advertise: Vec::new(),
            extra_healthcheck_headers: BTreeMap::new(),
            healthcheck_body_expect: None,
            deploy_group: None,
            paasta_instance: None,
        }
    }
}

impl ServiceDescriptor {
    /// The registrable port, `None` for absent or zero
    pub fn registrable_port(&self) -> Option<u16> {
        self.port.filter(|p| *p != 0)
    }

    pub fn mode(&self) -> &str {
        self.mode.as_deref().unwrap_or(DEFAULT_MODE)
    }

    pub fn healthcheck_mode(&self) -> &str {
        self.healthcheck_mode.as_deref().unwrap_or_else(|| self.mode())
    }

    pub fn healthcheck_timeout_s(&self) -> f64 {
        self.healthcheck_timeout_s
            .unwrap_or(DEFAULT_HEALTHCHECK_TIMEOUT_S)
    }

    pub fn healthcheck_uri(&self) -> &str {
        self.healthcheck_uri
            .as_deref()
            .unwrap_or(DEFAULT_HEALTHCHECK_URI)
    }

    pub fn hacheck_ip(&self) -> &str {
        self.hacheck_ip.as_deref().unwrap_or(DEFAULT_HACHECK_IP)
    }

    /// Address to register, the host address unless the service has its own
    pub fn bind_host<'a>(&'a self, host_ip: &'a str) -> &'a str {
        self.service_ip.as_deref().unwrap_or(host_ip)
    }

    /// Parsed extra advertisement rules; malformed rules are dropped
    pub fn extra_advertise_rules(&self) -> Vec<ExtraAdvertise> {
        self.extra_advertise
            .iter()
            .filter_map(|(src, dst)| {
                let rule = ExtraAdvertise::parse(src, dst);
                if rule.is_none() {
                    tracing::warn!(src = %src, dst = %dst, "Ignoring malformed extra_advertise rule");
                }
                rule
            })
            .collect()
    }
}

/// A (location, location type) pair such as `("sjc-dev", "region")`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocationPair {
    pub location_type: String,
    pub location: String,
}

impl LocationPair {
    pub fn new(location: impl Into<String>, location_type: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            location_type: location_type.into(),
        }
    }

    /// Parse `type:location`
    pub fn parse(s: &str) -> Option<Self> {
        let (typ, loc) = s.split_once(':')?;
        if typ.is_empty() || loc.is_empty() || loc.contains(':') {
            return None;
        }
        Some(Self::new(loc, typ))
    }
}

impl fmt::Display for LocationPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.location_type, self.location)
    }
}

/// Advertise at `dst` whenever this host sits in `src`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraAdvertise {
    pub src: LocationPair,
    pub dst: LocationPair,
}

impl ExtraAdvertise {
    pub fn parse(src: &str, dst: &str) -> Option<Self> {
        Some(Self {
            src: LocationPair::parse(src)?,
            dst: LocationPair::parse(dst)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_yaml() {
        let descriptor: ServiceDescriptor = serde_yaml::from_str("port: 1234").unwrap();
        assert_eq!(descriptor.registrable_port(), Some(1234));
        assert_eq!(descriptor.advertise, vec!["region"]);
        assert_eq!(descriptor.mode(), "http");
        assert_eq!(descriptor.healthcheck_mode(), "http");
        assert_eq!(descriptor.healthcheck_uri(), "/status");
        assert_eq!(descriptor.healthcheck_timeout_s(), 1.0);
        assert_eq!(descriptor.hacheck_ip(), "127.0.0.1");
        assert_eq!(descriptor.bind_host("10.0.0.1"), "10.0.0.1");
    }

    #[test]
    fn test_explicit_empty_advertise_is_kept() {
        let descriptor: ServiceDescriptor =
            serde_yaml::from_str("port: 1234\nadvertise: []").unwrap();
        assert!(descriptor.advertise.is_empty());
    }

    #[test]
    fn test_healthcheck_mode_follows_mode() {
        let descriptor: ServiceDescriptor =
            serde_yaml::from_str("port: 1\nmode: tcp").unwrap();
        assert_eq!(descriptor.healthcheck_mode(), "tcp");
    }

    #[test]
    fn test_zero_port_is_not_registrable() {
        let descriptor = ServiceDescriptor {
            port: Some(0),
            ..Default::default()
        };
        assert_eq!(descriptor.registrable_port(), None);
    }

    #[test]
    fn test_extra_advertise_parsing() {
        let descriptor: ServiceDescriptor = serde_yaml::from_str(
            r#"
port: 1
extra_advertise:
  - ["habitat:h1", "region:r2"]
  - ["bogus", "region:r2"]
"#,
        )
        .unwrap();
        let rules = descriptor.extra_advertise_rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].src, LocationPair::new("h1", "habitat"));
        assert_eq!(rules[0].dst.to_string(), "region:r2");
    }
}
