//! Services running on this host
//!
//! The orchestrators that know what runs here publish one YAML file per
//! source under `<services_dir>/<class>/`, each mapping a
//! `service.namespace` name to its descriptor.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::descriptor::ServiceDescriptor;

/// Where a service definition came from; decides its default weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceClass {
    /// Configured directly on the host
    Static,
    /// Scheduled here by an orchestrator
    Orchestrated,
}

impl ServiceClass {
    pub const ALL: [ServiceClass; 2] = [ServiceClass::Static, ServiceClass::Orchestrated];

    pub fn dir_name(&self) -> &'static str {
        match self {
            ServiceClass::Static => "static",
            ServiceClass::Orchestrated => "orchestrated",
        }
    }
}

pub type NamedService = (String, ServiceDescriptor);

pub trait ServiceSource {
    /// Services of one class currently running here
    fn services(&self, class: ServiceClass) -> Result<Vec<NamedService>, InventoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("IO error: {0}")]
    Io(String),
}

pub struct DirectoryInventory {
    root: PathBuf,
}

impl DirectoryInventory {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn read_file(path: &Path) -> Option<BTreeMap<String, ServiceDescriptor>> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unable to read service file");
                return None;
            }
        };
        match serde_yaml::from_str(&content) {
            Ok(services) => Some(services),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid service file");
                None
            }
        }
    }
}

impl ServiceSource for DirectoryInventory {
    fn services(&self, class: ServiceClass) -> Result<Vec<NamedService>, InventoryError> {
        let dir = self.root.join(class.dir_name());
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&dir)
            .map_err(|e| InventoryError::Io(format!("{}: {}", dir.display(), e)))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().map_or(false, |ext| ext == "yaml"))
            .collect();
        files.sort();

        Ok(files
            .iter()
            .filter_map(|path| Self::read_file(path))
            .flatten()
            .collect())
    }
}
