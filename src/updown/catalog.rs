//! Service metadata from soa-configs
//!
//! `<soa_dir>/<service>/service.yaml` holds service-wide settings and
//! `<soa_dir>/<service>/smartstack.yaml` maps each namespace to its mesh
//! settings.

use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::descriptor::{DEFAULT_HEALTHCHECK_URI, DEFAULT_MODE};

/// What the updown tool needs to know about one `service.namespace`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamespaceInfo {
    pub namespace: NamespaceConfig,
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NamespaceConfig {
    /// Outer `None` when undeclared, inner `None` for discovery-only services
    #[serde(default, deserialize_with = "declared")]
    pub proxy_port: Option<Option<u16>>,
    #[serde(default)]
    pub updown_timeout_s: Option<u64>,
    #[serde(default)]
    pub healthcheck_uri: Option<String>,
    #[serde(default)]
    pub healthcheck_port: Option<u16>,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub no_updown_service: bool,
}

fn declared<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl NamespaceInfo {
    /// Managed when the namespace is in the mesh and has not opted out
    pub fn is_managed(&self) -> bool {
        self.namespace.proxy_port.is_some() && !self.service.no_updown_service
    }

    /// Port and URI for a direct HTTP health check, `None` for non-HTTP services
    pub fn local_healthcheck(&self) -> Option<(u16, String)> {
        let mode = self.namespace.mode.as_deref().unwrap_or(DEFAULT_MODE);
        if mode != "http" {
            return None;
        }
        let port = self.namespace.healthcheck_port.or(self.service.port)?;
        let uri = self
            .namespace
            .healthcheck_uri
            .clone()
            .unwrap_or_else(|| DEFAULT_HEALTHCHECK_URI.to_string());
        Some((port, uri))
    }
}

pub trait ServiceCatalog {
    /// Settings for `name.namespace`; missing files mean empty settings
    fn namespace(&self, service: &str) -> Result<NamespaceInfo, CatalogError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Namespace missing from service name: {0}")]
    BadName(String),

    #[error("Invalid service config {path}: {reason}")]
    Parse { path: String, reason: String },
}

pub struct SoaCatalog {
    soa_dir: PathBuf,
}

impl SoaCatalog {
    pub fn new(soa_dir: PathBuf) -> Self {
        Self { soa_dir }
    }

    fn read_yaml<T>(path: &Path) -> Result<Option<T>, CatalogError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let Ok(content) = fs::read_to_string(path) else {
            return Ok(None);
        };
        serde_yaml::from_str(&content)
            .map(Some)
            .map_err(|e| CatalogError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }
}

impl ServiceCatalog for SoaCatalog {
    fn namespace(&self, service: &str) -> Result<NamespaceInfo, CatalogError> {
        let (name, namespace) = service
            .split_once('.')
            .ok_or_else(|| CatalogError::BadName(service.to_string()))?;
        let dir = self.soa_dir.join(name);

        let service_config: ServiceConfig =
            Self::read_yaml(&dir.join("service.yaml"))?.unwrap_or_default();
        let mut namespaces: BTreeMap<String, NamespaceConfig> =
            Self::read_yaml(&dir.join("smartstack.yaml"))?.unwrap_or_default();

        Ok(NamespaceInfo {
            namespace: namespaces.remove(namespace).unwrap_or_default(),
            service: service_config,
        })
    }
}
