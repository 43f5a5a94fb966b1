//! Config install, reload and restart decisions

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use nerve_tools::apply::{
    staged_path, ApplyError, ApplyOutcome, ApplySettings, ConfigApplier, ServiceAction, Supervisor,
};
use nerve_tools::nerve::NerveConfiguration;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Validate,
    Primary(ServiceAction),
    Standby(ServiceAction),
    Signal(i32),
}

/// Records every call; optionally fails validation, primary control or signals
#[derive(Default)]
struct RecordingSupervisor {
    calls: Mutex<Vec<Call>>,
    reject_config: bool,
    fail_primary: bool,
    fail_signal: bool,
}

impl RecordingSupervisor {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl Supervisor for RecordingSupervisor {
    async fn validate(&self, _config_path: &Path) -> Result<(), ApplyError> {
        self.record(Call::Validate);
        if self.reject_config {
            return Err(ApplyError::Validation("bad config".to_string()));
        }
        Ok(())
    }

    async fn primary(&self, action: ServiceAction) -> Result<(), ApplyError> {
        self.record(Call::Primary(action));
        if self.fail_primary {
            return Err(ApplyError::Supervisor("nerve stop failed".to_string()));
        }
        Ok(())
    }

    async fn standby(&self, action: ServiceAction) {
        self.record(Call::Standby(action));
    }

    fn signal_reload(&self, pid: i32) -> Result<(), ApplyError> {
        self.record(Call::Signal(pid));
        if self.fail_signal {
            return Err(ApplyError::Signal("no such process".to_string()));
        }
        Ok(())
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    settings: ApplySettings,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = ApplySettings {
            config_path: dir.path().join("nerve.conf.json"),
            heartbeat_path: dir.path().join("heartbeat"),
            heartbeat_threshold: Duration::from_secs(60),
            reload_with_sighup: false,
            pid_path: dir.path().join("nerve.pid"),
            registration_delay: Duration::ZERO,
        };
        fs::write(&settings.heartbeat_path, "").unwrap();
        Self { dir, settings }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn install(&self, config: &NerveConfiguration) {
        fs::write(&self.settings.config_path, config.to_json_pretty().unwrap()).unwrap();
    }

    fn make_heartbeat_stale(&mut self) {
        // Any file is older than a zero threshold after a moment
        self.settings.heartbeat_threshold = Duration::ZERO;
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn document(instance_id: &str) -> NerveConfiguration {
    NerveConfiguration::new(instance_id.to_string(), "/var/run/nerve/heartbeat".to_string())
}

const RESTART: [Call; 5] = [
    Call::Validate,
    Call::Standby(ServiceAction::Start),
    Call::Primary(ServiceAction::Stop),
    Call::Primary(ServiceAction::Start),
    Call::Standby(ServiceAction::Stop),
];

#[tokio::test]
async fn test_unchanged_config_takes_no_action() {
    let fixture = Fixture::new();
    fixture.install(&document("host1"));
    let supervisor = RecordingSupervisor::default();

    let outcome = ConfigApplier::new(fixture.settings.clone(), &supervisor)
        .apply(&document("host1"))
        .await
        .unwrap();

    assert_eq!(outcome, ApplyOutcome::Unchanged);
    assert_eq!(supervisor.calls(), vec![Call::Validate]);
    assert!(!staged_path(&fixture.settings.config_path).exists());
}

#[tokio::test]
async fn test_changed_config_restarts_behind_standby() {
    let fixture = Fixture::new();
    fixture.install(&document("host1"));
    let supervisor = RecordingSupervisor::default();

    let outcome = ConfigApplier::new(fixture.settings.clone(), &supervisor)
        .apply(&document("host2"))
        .await
        .unwrap();

    assert_eq!(outcome, ApplyOutcome::Restarted);
    assert_eq!(supervisor.calls(), RESTART.to_vec());
    let live = fs::read_to_string(&fixture.settings.config_path).unwrap();
    assert_eq!(live, document("host2").to_json_pretty().unwrap());
}

#[tokio::test]
async fn test_missing_live_config_counts_as_changed() {
    let fixture = Fixture::new();
    let supervisor = RecordingSupervisor::default();

    let outcome = ConfigApplier::new(fixture.settings.clone(), &supervisor)
        .apply(&document("host1"))
        .await
        .unwrap();

    assert_eq!(outcome, ApplyOutcome::Restarted);
    assert!(fixture.settings.config_path.exists());
}

#[tokio::test]
async fn test_stale_heartbeat_restarts_unchanged_config() {
    let mut fixture = Fixture::new();
    fixture.install(&document("host1"));
    fixture.make_heartbeat_stale();
    let supervisor = RecordingSupervisor::default();

    let outcome = ConfigApplier::new(fixture.settings.clone(), &supervisor)
        .apply(&document("host1"))
        .await
        .unwrap();

    assert_eq!(outcome, ApplyOutcome::Restarted);
    assert_eq!(supervisor.calls(), RESTART.to_vec());
}

#[tokio::test]
async fn test_stale_heartbeat_wins_over_sighup() {
    let mut fixture = Fixture::new();
    fixture.install(&document("host1"));
    fixture.make_heartbeat_stale();
    fixture.settings.reload_with_sighup = true;
    fs::write(&fixture.settings.pid_path, "4242\n").unwrap();
    let supervisor = RecordingSupervisor::default();

    let outcome = ConfigApplier::new(fixture.settings.clone(), &supervisor)
        .apply(&document("host2"))
        .await
        .unwrap();

    assert_eq!(outcome, ApplyOutcome::Restarted);
    assert!(!supervisor.calls().contains(&Call::Signal(4242)));
}

#[tokio::test]
async fn test_sighup_reload() {
    let mut fixture = Fixture::new();
    fixture.install(&document("host1"));
    fixture.settings.reload_with_sighup = true;
    fs::write(&fixture.settings.pid_path, "4242\n").unwrap();
    let supervisor = RecordingSupervisor::default();

    let outcome = ConfigApplier::new(fixture.settings.clone(), &supervisor)
        .apply(&document("host2"))
        .await
        .unwrap();

    assert_eq!(outcome, ApplyOutcome::Reloaded);
    assert_eq!(
        supervisor.calls(),
        vec![
            Call::Validate,
            Call::Signal(4242),
            Call::Standby(ServiceAction::Stop)
        ]
    );
}

#[tokio::test]
async fn test_unusable_pid_file_falls_back_to_restart() {
    for pid_content in [None, Some("not-a-pid")] {
        let mut fixture = Fixture::new();
        fixture.install(&document("host1"));
        fixture.settings.reload_with_sighup = true;
        if let Some(content) = pid_content {
            fs::write(&fixture.settings.pid_path, content).unwrap();
        }
        let supervisor = RecordingSupervisor::default();

        let outcome = ConfigApplier::new(fixture.settings.clone(), &supervisor)
            .apply(&document("host2"))
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Restarted);
        assert_eq!(supervisor.calls(), RESTART.to_vec());
    }
}

#[tokio::test]
async fn test_failed_signal_falls_back_to_restart() {
    let mut fixture = Fixture::new();
    fixture.install(&document("host1"));
    fixture.settings.reload_with_sighup = true;
    fs::write(&fixture.settings.pid_path, "4242").unwrap();
    let supervisor = RecordingSupervisor {
        fail_signal: true,
        ..Default::default()
    };

    let outcome = ConfigApplier::new(fixture.settings.clone(), &supervisor)
        .apply(&document("host2"))
        .await
        .unwrap();

    assert_eq!(outcome, ApplyOutcome::Restarted);
    assert_eq!(supervisor.calls()[1], Call::Signal(4242));
}

#[tokio::test]
async fn test_rejected_config_leaves_live_file() {
    let fixture = Fixture::new();
    fixture.install(&document("host1"));
    let supervisor = RecordingSupervisor {
        reject_config: true,
        ..Default::default()
    };

    let outcome = ConfigApplier::new(fixture.settings.clone(), &supervisor)
        .apply(&document("host2"))
        .await
        .unwrap();

    assert_eq!(outcome, ApplyOutcome::Rejected);
    assert_eq!(supervisor.calls(), vec![Call::Validate]);
    let live = fs::read_to_string(&fixture.settings.config_path).unwrap();
    assert_eq!(live, document("host1").to_json_pretty().unwrap());
}

#[tokio::test]
async fn test_standby_stops_when_primary_fails() {
    let fixture = Fixture::new();
    fixture.install(&document("host1"));
    let supervisor = RecordingSupervisor {
        fail_primary: true,
        ..Default::default()
    };

    let result = ConfigApplier::new(fixture.settings.clone(), &supervisor)
        .apply(&document("host2"))
        .await;

    assert!(matches!(result, Err(ApplyError::Supervisor(_))));
    assert_eq!(
        supervisor.calls(),
        vec![
            Call::Validate,
            Call::Standby(ServiceAction::Start),
            Call::Primary(ServiceAction::Stop),
            Call::Standby(ServiceAction::Stop),
        ]
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_installed_config_is_world_readable() {
    use std::os::unix::fs::PermissionsExt;

    let fixture = Fixture::new();
    let supervisor = RecordingSupervisor::default();
    ConfigApplier::new(fixture.settings.clone(), &supervisor)
        .apply(&document("host1"))
        .await
        .unwrap();

    let mode = fs::metadata(fixture.path("nerve.conf.json"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o644);
}
