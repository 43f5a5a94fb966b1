//! Process control for the nerve daemons
//!
//! Two nerve instances exist on a host: the primary, and a standby that
//! keeps registrations alive while the primary restarts.

use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::ApplyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
        }
    }
}

#[async_trait::async_trait]
pub trait Supervisor: Send + Sync {
    /// Ask nerve whether it accepts the config at `config_path`
    async fn validate(&self, config_path: &Path) -> Result<(), ApplyError>;

    /// Start or stop the primary nerve
    async fn primary(&self, action: ServiceAction) -> Result<(), ApplyError>;

    /// Start or stop the standby nerve; best effort
    async fn standby(&self, action: ServiceAction);

    /// Ask a running nerve to reload its config
    fn signal_reload(&self, pid: i32) -> Result<(), ApplyError>;
}

/// Drives nerve through its executable and service commands
pub struct CommandSupervisor {
    executable: PathBuf,
    command: Vec<String>,
    backup_command: Vec<String>,
}

impl CommandSupervisor {
    pub fn new(executable: PathBuf, command: Vec<String>, backup_command: Vec<String>) -> Self {
        Self {
            executable,
            command,
            backup_command,
        }
    }

    fn service_command(base: &[String], action: ServiceAction) -> Result<Command, ApplyError> {
        let (program, args) = base
            .split_first()
            .ok_or_else(|| ApplyError::Supervisor("empty service command".to_string()))?;
        let mut command = Command::new(program);
        command.args(args).arg(action.as_str());
        Ok(command)
    }
}

#[async_trait::async_trait]
impl Supervisor for CommandSupervisor {
    async fn validate(&self, config_path: &Path) -> Result<(), ApplyError> {
        debug!(executable = %self.executable.display(), config = %config_path.display(), "Validating nerve config");
        let status = Command::new(&self.executable)
            .arg("-c")
            .arg(config_path)
            .arg("-k")
            .status()
            .await
            .map_err(|e| ApplyError::Validation(format!("{}: {}", self.executable.display(), e)))?;

        if status.success() {
            Ok(())
        } else {
            Err(ApplyError::Validation(format!("nerve config check exited with {}", status)))
        }
    }

    async fn primary(&self, action: ServiceAction) -> Result<(), ApplyError> {
        info!(action = action.as_str(), "Controlling primary nerve");
        let status = Self::service_command(&self.command, action)?
            .status()
            .await
            .map_err(|e| ApplyError::Supervisor(e.to_string()))?;

        if status.success() {
            Ok(())
        } else {
            Err(ApplyError::Supervisor(format!(
                "nerve {} exited with {}",
                action.as_str(),
                status
            )))
        }
    }

    async fn standby(&self, action: ServiceAction) {
        info!(action = action.as_str(), "Controlling standby nerve");
        let result = match Self::service_command(&self.backup_command, action) {
            Ok(mut command) => command.status().await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match result {
            Ok(status) if !status.success() => {
                warn!(action = action.as_str(), %status, "Standby nerve command failed")
            }
            Err(e) => warn!(action = action.as_str(), error = %e, "Standby nerve command failed"),
            Ok(_) => {}
        }
    }

    fn signal_reload(&self, pid: i32) -> Result<(), ApplyError> {
        send_sighup(pid)
    }
}

#[cfg(unix)]
fn send_sighup(pid: i32) -> Result<(), ApplyError> {
    if pid <= 0 {
        return Err(ApplyError::Signal(format!("refusing to signal pid {}", pid)));
    }
    // SAFETY: kill(2) has no memory safety requirements
    let rc = unsafe { libc::kill(pid, libc::SIGHUP) };
    if rc == 0 {
        Ok(())
    } else {
        Err(ApplyError::Signal(format!(
            "SIGHUP to {} failed: {}",
            pid,
            std::io::Error::last_os_error()
        )))
    }
}

#[cfg(not(unix))]
fn send_sighup(_pid: i32) -> Result<(), ApplyError> {
    Err(ApplyError::Signal("signals are not supported on this platform".to_string()))
}
