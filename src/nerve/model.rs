//! The nerve configuration document

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::labels::Labels;

/// Consecutive successes before nerve marks a service up
pub const CHECK_RISE: u32 = 1;
/// Consecutive failures before nerve marks a service down
pub const CHECK_FALL: u32 = 2;

/// One health check nerve runs against hacheck
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(rename = "type")]
    pub check_type: String,
    pub host: String,
    pub port: u16,
    pub uri: String,
    pub timeout: f64,
    pub open_timeout: f64,
    pub rise: u32,
    pub fall: u32,
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect: Option<String>,
}

impl HealthCheck {
    /// An HTTP check through hacheck with the standard rise/fall thresholds
    pub fn hacheck(
        host: impl Into<String>,
        port: u16,
        uri: String,
        timeout: f64,
        headers: BTreeMap<String, String>,
    ) -> Self {
        Self {
            check_type: "http".to_string(),
            host: host.into(),
            port,
            uri,
            timeout,
            open_timeout: timeout,
            rise: CHECK_RISE,
            fall: CHECK_FALL,
            headers,
            expect: None,
        }
    }
}

/// One service registration nerve maintains in ZooKeeper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationEntry {
    pub port: u16,
    pub host: String,
    pub zk_hosts: Vec<String>,
    pub zk_path: String,
    pub check_interval: f64,
    pub checks: Vec<HealthCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Labels>,
    pub weight: u32,
}

/// Top-level document written to the nerve config path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NerveConfiguration {
    pub instance_id: String,
    pub services: BTreeMap<String, RegistrationEntry>,
    pub heartbeat_path: String,
}

impl NerveConfiguration {
    pub fn new(instance_id: String, heartbeat_path: String) -> Self {
        Self {
            instance_id,
            services: BTreeMap::new(),
            heartbeat_path,
        }
    }

    /// Serialize with sorted keys and four-space indentation
    ///
    /// Equal documents always produce identical bytes, which is what makes
    /// a byte comparison against the live file a valid change detector.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        // Value maps are ordered, so this also sorts struct fields
        let value = serde_json::to_value(self)?;
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        value.serialize(&mut ser)?;
        buf.push(b'\n');
        // serde_json only emits UTF-8
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
