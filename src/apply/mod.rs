//! Installing a generated nerve config
//!
//! A new config goes through:
//! 1. Write to `<config>.tmp` next to the live file (same filesystem)
//! 2. Validate with `nerve -k`; on failure stop here, leaving the stale
//!    live config for staleness monitoring to alert on
//! 3. Rename over the live file, whether or not anything changed
//! 4. Reload with SIGHUP, restart behind a standby nerve, or do nothing
//!
//! A stale heartbeat forces a restart even when the config is unchanged.

pub mod supervisor;

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{error, info, warn};

use crate::config::NerveConfig;
use crate::nerve::NerveConfiguration;

pub use supervisor::{CommandSupervisor, ServiceAction, Supervisor};

/// What happened to the running nerve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// nerve rejected the config; nothing was installed
    Rejected,
    /// Config installed, nerve left alone
    Unchanged,
    /// Config installed and nerve reloaded in place
    Reloaded,
    /// Config installed and nerve restarted behind the standby
    Restarted,
}

#[derive(Debug, Clone)]
pub struct ApplySettings {
    pub config_path: PathBuf,
    pub heartbeat_path: PathBuf,
    pub heartbeat_threshold: Duration,
    pub reload_with_sighup: bool,
    pub pid_path: PathBuf,
    pub registration_delay: Duration,
}

impl From<&NerveConfig> for ApplySettings {
    fn from(config: &NerveConfig) -> Self {
        Self {
            config_path: config.config_path.clone(),
            heartbeat_path: config.heartbeat_path.clone(),
            heartbeat_threshold: config.heartbeat_threshold(),
            reload_with_sighup: config.reload_with_sighup,
            pid_path: config.pid_path.clone(),
            registration_delay: config.registration_delay(),
        }
    }
}

pub struct ConfigApplier<'a> {
    settings: ApplySettings,
    supervisor: &'a dyn Supervisor,
}

impl<'a> ConfigApplier<'a> {
    pub fn new(settings: ApplySettings, supervisor: &'a dyn Supervisor) -> Self {
        Self {
            settings,
            supervisor,
        }
    }

    pub async fn apply(&self, config: &NerveConfiguration) -> Result<ApplyOutcome, ApplyError> {
        let rendered = config
            .to_json_pretty()
            .map_err(|e| ApplyError::Serialize(e.to_string()))?;
        let live_path = &self.settings.config_path;
        let staged_path = staged_path(live_path);

        info!("Staging nerve config at {:?}", staged_path);
        fs::write(&staged_path, rendered.as_bytes()).map_err(|e| ApplyError::Io(e.to_string()))?;
        set_world_readable(&staged_path)?;

        // Decide before the swap, the live file is about to be replaced
        let should_reload = files_differ(&staged_path, live_path);
        let should_restart = heartbeat_is_stale(
            &self.settings.heartbeat_path,
            self.settings.heartbeat_threshold,
            SystemTime::now(),
        );
        info!(should_reload, should_restart, "Compared against live config");

        if let Err(e) = self.supervisor.validate(&staged_path).await {
            error!(error = %e, "Generated nerve config is invalid, leaving live config untouched");
            return Ok(ApplyOutcome::Rejected);
        }

        fs::rename(&staged_path, live_path).map_err(|e| {
            ApplyError::Io(format!("Failed to install {:?}: {}", live_path, e))
        })?;
        info!("Installed nerve config at {:?}", live_path);

        if should_restart {
            warn!("nerve heartbeat is stale, restarting");
            self.restart().await?;
            return Ok(ApplyOutcome::Restarted);
        }
        if !should_reload {
            return Ok(ApplyOutcome::Unchanged);
        }
        if self.settings.reload_with_sighup {
            match self.reload() {
                Ok(()) => {
                    self.supervisor.standby(ServiceAction::Stop).await;
                    return Ok(ApplyOutcome::Reloaded);
                }
                Err(e) => warn!(error = %e, "SIGHUP reload failed, falling back to restart"),
            }
        }
        self.restart().await?;
        Ok(ApplyOutcome::Restarted)
    }

    fn reload(&self) -> Result<(), ApplyError> {
        let pid = read_pid(&self.settings.pid_path)?;
        info!(pid, "Reloading nerve with SIGHUP");
        self.supervisor.signal_reload(pid)
    }

    /// Restart the primary while the standby holds the registrations
    async fn restart(&self) -> Result<(), ApplyError> {
        self.supervisor.standby(ServiceAction::Start).await;
        let result = self.cycle_primary().await;
        // Runs on every exit from the cycle, success or failure
        self.supervisor.standby(ServiceAction::Stop).await;
        result
    }

    async fn cycle_primary(&self) -> Result<(), ApplyError> {
        tokio::time::sleep(self.settings.registration_delay).await;
        self.supervisor.primary(ServiceAction::Stop).await?;
        self.supervisor.primary(ServiceAction::Start).await?;
        tokio::time::sleep(self.settings.registration_delay).await;
        Ok(())
    }
}

/// `<path>.tmp`, in the same directory so the final rename is atomic
pub fn staged_path(live_path: &Path) -> PathBuf {
    let mut name = OsString::from(live_path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// True unless both files exist with identical bytes
pub fn files_differ(a: &Path, b: &Path) -> bool {
    match (fs::read(a), fs::read(b)) {
        (Ok(a), Ok(b)) => a != b,
        _ => true,
    }
}

/// True when the heartbeat file exists and was last touched before `now - threshold`
pub fn heartbeat_is_stale(path: &Path, threshold: Duration, now: SystemTime) -> bool {
    let Ok(modified) = fs::metadata(path).and_then(|m| m.modified()) else {
        return false;
    };
    match now.checked_sub(threshold) {
        Some(cutoff) => modified < cutoff,
        None => false,
    }
}

pub fn read_pid(path: &Path) -> Result<i32, ApplyError> {
    let content = fs::read_to_string(path)
        .map_err(|e| ApplyError::PidFile(format!("{:?}: {}", path, e)))?;
    content
        .trim()
        .parse()
        .map_err(|_| ApplyError::PidFile(format!("{:?} does not hold a pid", path)))
}

#[cfg(unix)]
fn set_world_readable(path: &Path) -> Result<(), ApplyError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))
        .map_err(|e| ApplyError::Io(e.to_string()))
}

#[cfg(not(unix))]
fn set_world_readable(_path: &Path) -> Result<(), ApplyError> {
    Ok(())
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApplyError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization failed: {0}")]
    Serialize(String),

    #[error("Invalid nerve config: {0}")]
    Validation(String),

    #[error("nerve control failed: {0}")]
    Supervisor(String),

    #[error("Unusable pid file: {0}")]
    PidFile(String),

    #[error("Signal failed: {0}")]
    Signal(String),
}
