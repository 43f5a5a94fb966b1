//! Location topology and ZooKeeper cluster discovery
//!
//! Both are owned by other systems; this module only reads what they
//! publish on the local filesystem.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Where this host sits and how location types relate to each other
pub trait LocationTopology {
    /// The location of this host at the given type
    fn current_location(&self, location_type: &str) -> Result<String, TopologyError>;

    /// Every `to_type` location that overlaps `location` of `from_type`
    fn convert_location(
        &self,
        location: &str,
        from_type: &str,
        to_type: &str,
    ) -> Result<Vec<String>, TopologyError>;

    /// `Less` when `a` is finer than `b`, `Greater` when coarser
    fn compare_types(&self, a: &str, b: &str) -> Result<Ordering, TopologyError>;
}

/// Per-location ZooKeeper connection strings
pub trait ZookeeperDirectory {
    fn hosts(&self, cluster_type: &str, location: &str) -> Result<Vec<String>, TopologyError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("Unknown location type: {0}")]
    UnknownType(String),

    #[error("No current location for type {0}")]
    NoCurrentLocation(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid topology file {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Topology backed by `<etc_dir>/<type>` files and a location mapping
///
/// The mapping is a YAML document keyed by the finest location, each row
/// naming that location's ancestor at every type:
///
/// ```yaml
/// uswest1adevc:
///   habitat: uswest1adevc
///   region: uswest1-devc
///   superregion: norcal-devc
///   ecosystem: devc
/// ```
pub struct FileTopology {
    etc_dir: PathBuf,
    rows: Vec<BTreeMap<String, String>>,
    type_order: Vec<String>,
}

impl FileTopology {
    pub fn new(etc_dir: PathBuf, rows: Vec<BTreeMap<String, String>>, type_order: Vec<String>) -> Self {
        Self {
            etc_dir,
            rows,
            type_order,
        }
    }

    /// Load the location mapping file
    pub fn load(
        etc_dir: PathBuf,
        mapping_path: &Path,
        type_order: Vec<String>,
    ) -> Result<Self, TopologyError> {
        let content = fs::read_to_string(mapping_path)
            .map_err(|e| TopologyError::Io(format!("{}: {}", mapping_path.display(), e)))?;
        let mapping: BTreeMap<String, BTreeMap<String, String>> = serde_yaml::from_str(&content)
            .map_err(|e| TopologyError::Parse {
                path: mapping_path.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::new(etc_dir, mapping.into_values().collect(), type_order))
    }

    fn rank(&self, location_type: &str) -> Result<usize, TopologyError> {
        self.type_order
            .iter()
            .position(|t| t == location_type)
            .ok_or_else(|| TopologyError::UnknownType(location_type.to_string()))
    }
}

impl LocationTopology for FileTopology {
    fn current_location(&self, location_type: &str) -> Result<String, TopologyError> {
        let path = self.etc_dir.join(location_type);
        let location = fs::read_to_string(&path)
            .map_err(|_| TopologyError::NoCurrentLocation(location_type.to_string()))?;
        let location = location.trim();
        if location.is_empty() {
            return Err(TopologyError::NoCurrentLocation(location_type.to_string()));
        }
        Ok(location.to_string())
    }

    fn convert_location(
        &self,
        location: &str,
        from_type: &str,
        to_type: &str,
    ) -> Result<Vec<String>, TopologyError> {
        self.rank(from_type)?;
        self.rank(to_type)?;
        if from_type == to_type {
            return Ok(vec![location.to_string()]);
        }

        let converted: BTreeSet<String> = self
            .rows
            .iter()
            .filter(|row| row.get(from_type).map(String::as_str) == Some(location))
            .filter_map(|row| row.get(to_type).cloned())
            .collect();
        Ok(converted.into_iter().collect())
    }

    fn compare_types(&self, a: &str, b: &str) -> Result<Ordering, TopologyError> {
        Ok(self.rank(a)?.cmp(&self.rank(b)?))
    }
}

/// ZooKeeper topology files at `<dir>/<cluster_type>/<location>.yaml`
///
/// Each file lists `[host, port]` pairs.
pub struct ZkTopologyDir {
    dir: PathBuf,
}

impl ZkTopologyDir {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl ZookeeperDirectory for ZkTopologyDir {
    fn hosts(&self, cluster_type: &str, location: &str) -> Result<Vec<String>, TopologyError> {
        let path = self
            .dir
            .join(cluster_type)
            .join(format!("{}.yaml", location));
        let content = fs::read_to_string(&path)
            .map_err(|e| TopologyError::Io(format!("{}: {}", path.display(), e)))?;
        let entries: Vec<(String, u16)> =
            serde_yaml::from_str(&content).map_err(|e| TopologyError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(entries
            .into_iter()
            .map(|(host, port)| format!("{}:{}", host, port))
            .collect())
    }
}
