//! Envoy EDS snapshots written by the mesh control plane
//!
//! One file per service at `<eds_dir>/<service>/<service>.yaml`. We only
//! have egress clusters, so the first resource holds every endpoint.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
struct Snapshot {
    #[serde(default)]
    resources: Vec<Resource>,
}

#[derive(Debug, Default, Deserialize)]
struct Resource {
    #[serde(default)]
    endpoints: Vec<LocalityEndpoints>,
}

#[derive(Debug, Default, Deserialize)]
struct LocalityEndpoints {
    #[serde(default)]
    lb_endpoints: Option<Vec<LbEndpoint>>,
}

#[derive(Debug, Deserialize)]
struct LbEndpoint {
    endpoint: Endpoint,
}

#[derive(Debug, Deserialize)]
struct Endpoint {
    address: Address,
}

#[derive(Debug, Deserialize)]
struct Address {
    socket_address: SocketAddress,
}

#[derive(Debug, Deserialize)]
struct SocketAddress {
    address: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid EDS snapshot {path}: {reason}")]
    Parse { path: String, reason: String },
}

pub fn snapshot_path(eds_dir: &Path, service: &str) -> PathBuf {
    eds_dir.join(service).join(format!("{}.yaml", service))
}

/// Addresses of every endpoint in a service's snapshot
///
/// `Ok(None)` when no snapshot exists yet.
pub fn endpoint_addresses(eds_dir: &Path, service: &str) -> Result<Option<Vec<String>>, SnapshotError> {
    let path = snapshot_path(eds_dir, service);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)
        .map_err(|e| SnapshotError::Io(format!("{}: {}", path.display(), e)))?;
    parse_addresses(&content)
        .map(Some)
        .map_err(|reason| SnapshotError::Parse {
            path: path.display().to_string(),
            reason,
        })
}

fn parse_addresses(content: &str) -> Result<Vec<String>, String> {
    let snapshot: Snapshot = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
    let Some(resource) = snapshot.resources.into_iter().next() else {
        return Ok(Vec::new());
    };
    Ok(resource
        .endpoints
        .into_iter()
        .filter_map(|locality| locality.lb_endpoints)
        .flatten()
        .map(|lb| lb.endpoint.address.socket_address.address)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"
resources:
  - endpoints:
      - lb_endpoints:
          - endpoint:
              address:
                socket_address:
                  address: 10.0.0.1
                  port_value: 31000
          - endpoint:
              address:
                socket_address:
                  address: 10.0.0.2
                  port_value: 31000
      - lb_endpoints: []
      - locality: {zone: b}
"#;

    #[test]
    fn test_parse_addresses() {
        assert_eq!(parse_addresses(SNAPSHOT).unwrap(), vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_empty_cluster() {
        assert!(parse_addresses("resources:\n  - endpoints: []\n").unwrap().is_empty());
    }

    #[test]
    fn test_missing_snapshot() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(endpoint_addresses(dir.path(), "foo.main").unwrap().is_none());
    }

    #[test]
    fn test_snapshot_on_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::create_dir(dir.path().join("foo.main")).unwrap();
        fs::write(snapshot_path(dir.path(), "foo.main"), SNAPSHOT).unwrap();
        assert_eq!(
            endpoint_addresses(dir.path(), "foo.main").unwrap(),
            Some(vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()])
        );
    }
}
