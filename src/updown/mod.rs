//! Marking a local service up or down in the service mesh
//!
//! hacheck is told to fail (or resume) the service's checks, nerve then
//! drops (or re-adds) the registration, and the mesh control plane pushes
//! the change into envoy's endpoint snapshots. We poll those snapshots
//! until this host's address appears or disappears.

pub mod catalog;
pub mod hacheck;

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::mesh::eds;
use crate::net;

pub use catalog::{NamespaceInfo, ServiceCatalog, SoaCatalog};
pub use hacheck::{Hacheck, HealthControl};

/// Maximum time to wait when neither flag nor service config sets one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Extra wait after convergence, so remote load balancers catch up and
/// in-flight requests finish
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(5);

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DesiredState {
    Up,
    Down,
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DesiredState::Up => write!(f, "up"),
            DesiredState::Down => write!(f, "down"),
        }
    }
}

/// `service.namespace[:port]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    pub service: String,
    pub port: Option<u16>,
}

impl ServiceTarget {
    pub fn parse(s: &str) -> Result<Self, String> {
        let (service, port) = match s.split_once(':') {
            Some((service, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| "Port is not a number".to_string())?;
                (service, Some(port))
            }
            None => (s, None),
        };
        let parts: Vec<&str> = service.split('.').collect();
        if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
            return Err("Namespace missing from service name".to_string());
        }
        Ok(Self {
            service: service.to_string(),
            port,
        })
    }
}

impl std::str::FromStr for ServiceTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone)]
pub struct UpdownOptions {
    /// Overrides the service's `updown_timeout_s`
    pub timeout: Option<Duration>,
    pub wait_time: Duration,
    /// Only wait, do not reconfigure hacheck
    pub wait_only: bool,
    /// Poll envoy EDS snapshots here; no polling when unset
    pub eds_dir: Option<PathBuf>,
    pub poll_interval: Duration,
    /// This host's address as it appears in the snapshots; resolved from
    /// the hostname when unset, and only if polling
    pub local_ip: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateOutcome {
    /// Service is not in the mesh; nothing was done
    NotManaged,
    /// hacheck was reconfigured and no convergence check was requested
    Requested,
    Converged,
    TimedOut,
}

impl StateOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            StateOutcome::TimedOut => 1,
            _ => 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MeshStateError {
    #[error(transparent)]
    Catalog(#[from] catalog::CatalogError),

    #[error("No backends present in the service mesh for {0}, have you added any?")]
    NoEndpoints(String),

    #[error("Unable to determine host address: {0}")]
    HostAddress(String),
}

impl MeshStateError {
    pub fn exit_code(&self) -> i32 {
        match self {
            MeshStateError::NoEndpoints(_) => 2,
            MeshStateError::Catalog(_) | MeshStateError::HostAddress(_) => 1,
        }
    }
}

/// Operator guidance printed when a service never reached the state
pub fn timeout_guidance(state: DesiredState) -> &'static [&'static str] {
    match state {
        DesiredState::Up => &[
            "*** Please manually check your service's healthcheck endpoint. ***",
            "*** If your service is healthy, then please talk to the mesh operators. ***",
        ],
        DesiredState::Down => &[
            "*** This host is still advertised in the mesh. ***",
            "*** Check that hacheck is running and that nerve picked up the down state. ***",
        ],
    }
}

/// Where and for how long to watch the mesh
struct Poll<'a> {
    eds_dir: &'a Path,
    local_ip: &'a str,
    timeout: Duration,
}

pub struct MeshStateController<'a> {
    catalog: &'a dyn ServiceCatalog,
    health: &'a dyn HealthControl,
}

impl<'a> MeshStateController<'a> {
    pub fn new(catalog: &'a dyn ServiceCatalog, health: &'a dyn HealthControl) -> Self {
        Self { catalog, health }
    }

    pub async fn set_state(
        &self,
        target: &ServiceTarget,
        state: DesiredState,
        options: &UpdownOptions,
    ) -> Result<StateOutcome, MeshStateError> {
        let info = self.catalog.namespace(&target.service)?;
        if !info.is_managed() {
            println!("{} is not available in the service mesh, doing nothing", target.service);
            return Ok(StateOutcome::NotManaged);
        }

        let timeout = options
            .timeout
            .or(info.namespace.updown_timeout_s.map(Duration::from_secs))
            .unwrap_or(DEFAULT_TIMEOUT);

        if !options.wait_only {
            info!(service = %target.service, %state, port = ?target.port, "Reconfiguring hacheck");
            if let Err(e) = self.health.set_state(&target.service, state, target.port).await {
                eprintln!("{}", e);
            }
        }

        match &options.eds_dir {
            Some(eds_dir) => {
                let local_ip = match &options.local_ip {
                    Some(ip) => ip.clone(),
                    None => net::host_ip().map_err(|e| MeshStateError::HostAddress(e.to_string()))?,
                };
                let poll = Poll {
                    eds_dir,
                    local_ip: &local_ip,
                    timeout,
                };
                self.wait_for_state(&target.service, &info, state, &poll, options)
                    .await
            }
            None => Ok(StateOutcome::Requested),
        }
    }

    async fn wait_for_state(
        &self,
        service: &str,
        info: &NamespaceInfo,
        state: DesiredState,
        poll: &Poll<'_>,
        options: &UpdownOptions,
    ) -> Result<StateOutcome, MeshStateError> {
        let iterations = if options.poll_interval.is_zero() {
            1
        } else {
            (poll.timeout.as_secs_f64() / options.poll_interval.as_secs_f64()) as u64
        };
        let mut polled = 0;

        for n in 0..iterations {
            polled = n;
            // With every service on the host downed, the mesh will never show
            // us; a healthy service is the best we can hope for
            if state == DesiredState::Up && self.health.all_down_override().await {
                if let Some((port, uri)) = info.local_healthcheck() {
                    if self.health.local_healthcheck(port, &uri).await {
                        return Ok(StateOutcome::Converged);
                    }
                }
            }

            if mesh_state_matches(poll.eds_dir, service, state, poll.local_ip)? {
                println!("{}Service entered state '{}'", separator(n), state);
                println!("Sleeping for an additional {}s", options.wait_time.as_secs());
                tokio::time::sleep(options.wait_time).await;
                return Ok(StateOutcome::Converged);
            }

            print!(".");
            std::io::stdout().flush().ok();
            tokio::time::sleep(options.poll_interval).await;
        }

        println!("{}Service failed to enter state '{}'", separator(polled), state);
        for line in timeout_guidance(state) {
            println!("{}", line);
        }
        Ok(StateOutcome::TimedOut)
    }
}

fn separator(iteration: u64) -> &'static str {
    if iteration > 0 {
        "\n"
    } else {
        ""
    }
}

/// Whether the snapshot shows `local_ip` the way `state` wants it
///
/// Present means up, absent means down. A snapshot with no endpoints at
/// all is a broken mesh setup rather than a state, and aborts the wait.
pub fn mesh_state_matches(
    eds_dir: &Path,
    service: &str,
    state: DesiredState,
    local_ip: &str,
) -> Result<bool, MeshStateError> {
    let addresses = match eds::endpoint_addresses(eds_dir, service) {
        Ok(Some(addresses)) => addresses,
        Ok(None) => return Ok(false),
        Err(e) => {
            warn!(error = %e, "Unable to read EDS snapshot");
            return Ok(false);
        }
    };
    if addresses.is_empty() {
        return Err(MeshStateError::NoEndpoints(service.to_string()));
    }

    let present = addresses.iter().any(|address| address == local_ip);
    Ok(match state {
        DesiredState::Up => present,
        DesiredState::Down => !present,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_parsing() {
        assert_eq!(
            ServiceTarget::parse("myservice.name").unwrap(),
            ServiceTarget {
                service: "myservice.name".to_string(),
                port: None
            }
        );
        assert_eq!(ServiceTarget::parse("myservice.name:1234").unwrap().port, Some(1234));
        assert!(ServiceTarget::parse("myservice").is_err());
        assert!(ServiceTarget::parse("a.b.c").is_err());
        assert!(ServiceTarget::parse("myservice.name:http").is_err());
        assert!(ServiceTarget::parse(".name").is_err());
    }

    #[test]
    fn test_guidance_differs_by_state() {
        assert_ne!(timeout_guidance(DesiredState::Up), timeout_guidance(DesiredState::Down));
        assert!(timeout_guidance(DesiredState::Up)[0].contains("healthcheck"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(StateOutcome::Converged.exit_code(), 0);
        assert_eq!(StateOutcome::NotManaged.exit_code(), 0);
        assert_eq!(StateOutcome::TimedOut.exit_code(), 1);
        assert_eq!(MeshStateError::NoEndpoints("x.y".to_string()).exit_code(), 2);
    }
}
