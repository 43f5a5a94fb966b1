//! Control over the local hacheck health-check proxy

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::DesiredState;

#[async_trait::async_trait]
pub trait HealthControl: Send + Sync {
    /// Force the service's checks to fail (`Down`) or resume normal checking (`Up`)
    async fn set_state(
        &self,
        service: &str,
        state: DesiredState,
        port: Option<u16>,
    ) -> Result<(), String>;

    /// Whether an operator has downed every service on this host
    async fn all_down_override(&self) -> bool;

    /// Direct HTTP check of the service, bypassing hacheck and the mesh
    async fn local_healthcheck(&self, port: u16, uri: &str) -> bool;
}

pub struct Hacheck {
    pub hadown: PathBuf,
    pub haup: PathBuf,
    pub hastatus: PathBuf,
    pub check_timeout: Duration,
}

impl Default for Hacheck {
    fn default() -> Self {
        Self {
            hadown: PathBuf::from("/usr/bin/hadown"),
            haup: PathBuf::from("/usr/bin/haup"),
            hastatus: PathBuf::from("/usr/bin/hastatus"),
            check_timeout: Duration::from_secs(5),
        }
    }
}

impl Hacheck {
    /// Arguments for `hadown`/`haup`
    pub fn state_args(service: &str, port: Option<u16>) -> Vec<String> {
        let mut args = vec![service.to_string()];
        if let Some(port) = port {
            args.push("-P".to_string());
            args.push(port.to_string());
        }
        args
    }
}

#[async_trait::async_trait]
impl HealthControl for Hacheck {
    async fn set_state(
        &self,
        service: &str,
        state: DesiredState,
        port: Option<u16>,
    ) -> Result<(), String> {
        let program = match state {
            DesiredState::Down => &self.hadown,
            DesiredState::Up => &self.haup,
        };
        let status = Command::new(program)
            .args(Self::state_args(service, port))
            .status()
            .await
            .map_err(|e| format!("Error running {}: {}", program.display(), e))?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("Error running {}: {}", program.display(), status))
        }
    }

    async fn all_down_override(&self) -> bool {
        let status = Command::new(&self.hastatus)
            .arg("all")
            .stdout(Stdio::null())
            .status()
            .await;
        !matches!(status, Ok(s) if s.success())
    }

    async fn local_healthcheck(&self, port: u16, uri: &str) -> bool {
        let uri = if uri.starts_with('/') {
            uri.to_string()
        } else {
            format!("/{}", uri)
        };
        let url = format!("http://127.0.0.1:{}{}", port, uri);
        let result = reqwest::Client::new()
            .get(&url)
            .timeout(self.check_timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match result {
            Ok(_) => true,
            Err(e) => {
                debug!(url = %url, error = %e, "Local healthcheck failed");
                eprintln!("Calling {}, got - {}", url, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_args() {
        assert_eq!(Hacheck::state_args("test.main", None), vec!["test.main"]);
        assert_eq!(
            Hacheck::state_args("test.main", Some(1234)),
            vec!["test.main", "-P", "1234"]
        );
    }

    #[tokio::test]
    async fn test_hastatus_failure_means_all_down() {
        let hacheck = Hacheck {
            hastatus: PathBuf::from("false"),
            ..Default::default()
        };
        assert!(hacheck.all_down_override().await);

        let hacheck = Hacheck {
            hastatus: PathBuf::from("true"),
            ..Default::default()
        };
        assert!(!hacheck.all_down_override().await);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unhealthy() {
        let hacheck = Hacheck {
            check_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        assert!(!hacheck.local_healthcheck(1, "/status").await);
    }
}
