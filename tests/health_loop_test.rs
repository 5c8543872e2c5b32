// Integration test for the background health-check loop, driven by a manual clock

#![cfg(unix)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use steward::config::{LaunchSpec, SupervisorSettings};
use steward::process::HealthStatus;
use steward::security::{RiskPolicy, SecurityGate};
use steward::supervisor::{Clock, FleetState, FleetSupervisor, ManualClock};
use tokio::sync::Semaphore;

fn fast_settings() -> SupervisorSettings {
    SupervisorSettings {
        check_interval_secs: 30,
        startup_grace_ms: 100,
        restart_settle_ms: 20,
        error_backoff_secs: 5,
    }
}

fn sleeper(name: &str) -> LaunchSpec {
    let mut spec = LaunchSpec::new(name, "/bin/sleep").with_args(["30"]);
    spec.stop_timeout_secs = 2;
    spec
}

/// Clock that records every requested sleep and can be told to fail
struct ScriptedClock {
    sleeps: Mutex<Vec<Duration>>,
    ticks: Semaphore,
    fail_next_now: AtomicBool,
    fail_sleeps: AtomicBool,
}

impl ScriptedClock {
    fn new() -> Self {
        Self {
            sleeps: Mutex::new(Vec::new()),
            ticks: Semaphore::new(0),
            fail_next_now: AtomicBool::new(false),
            fail_sleeps: AtomicBool::new(false),
        }
    }

    fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    async fn wait_for_sleeps(&self, count: usize) {
        while self.sleeps().len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl Clock for ScriptedClock {
    fn now(&self) -> DateTime<Utc> {
        if self.fail_next_now.swap(false, Ordering::SeqCst) {
            panic!("clock unavailable");
        }
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        if self.fail_sleeps.load(Ordering::SeqCst) {
            panic!("timer failed");
        }
        if let Ok(permit) = self.ticks.acquire().await {
            permit.forget();
        }
    }
}

async fn started_fleet<C: Clock + 'static>(clock: Arc<C>) -> Arc<FleetSupervisor> {
    let gate = Arc::new(SecurityGate::new(RiskPolicy::default()));
    let fleet = FleetSupervisor::new(fast_settings(), gate).with_clock(clock);
    fleet
        .load_and_register(vec![sleeper("server-x"), sleeper("files")])
        .await
        .unwrap();
    assert!(fleet.start_all().await.values().all(|r| r.is_ok()));
    Arc::new(fleet)
}

async fn crash(fleet: &FleetSupervisor, name: &str) {
    let pid = fleet.get_fleet_status().await[name].pid.unwrap();
    kill(Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_loop_remediates_after_approval() {
    let clock = Arc::new(ManualClock::new());
    let fleet = started_fleet(Arc::clone(&clock)).await;
    crash(&fleet, "server-x").await;

    fleet.spawn_health_loop().unwrap();
    assert_eq!(fleet.state(), FleetState::Running);

    // First cycle runs immediately, then the loop sleeps
    clock.wait_for_sleeps(1).await;
    let pending = fleet.list_pending_approvals();
    assert_eq!(pending.len(), 1);
    assert_eq!(
        fleet.get_fleet_status().await["server-x"].status,
        HealthStatus::Offline
    );

    assert!(fleet.approve_operation(&pending[0].id, "alice"));

    clock.tick();
    clock.wait_for_sleeps(2).await;

    let status = fleet.get_fleet_status().await;
    assert_eq!(status["server-x"].status, HealthStatus::Healthy);
    assert_eq!(status["server-x"].restart_count, 1);
    assert_eq!(status["files"].restart_count, 0);
    assert!(fleet.list_pending_approvals().is_empty());

    let results = fleet.shutdown().await;
    assert!(results.values().all(|r| r.is_ok()));
}

#[tokio::test]
async fn test_shutdown_interrupts_sleep() {
    let clock = Arc::new(ManualClock::new());
    let fleet = started_fleet(Arc::clone(&clock)).await;

    fleet.spawn_health_loop().unwrap();
    clock.wait_for_sleeps(1).await;
    assert!(!fleet.health_loop_finished());

    // The clock is never ticked, so only the state change can end the sleep
    let results = tokio::time::timeout(Duration::from_secs(10), fleet.shutdown())
        .await
        .expect("shutdown should not wait for the check interval");

    assert_eq!(results.len(), 2);
    assert!(results.values().all(|r| r.is_ok()));
    assert_eq!(fleet.state(), FleetState::Idle);
    assert!(fleet.health_loop_finished());
    assert_eq!(clock.sleeps(), 1);

    let status = fleet.get_fleet_status().await;
    assert!(status.values().all(|s| s.status == HealthStatus::Unknown));
}

#[tokio::test]
async fn test_loop_cannot_be_spawned_twice() {
    let clock = Arc::new(ManualClock::new());
    let fleet = started_fleet(Arc::clone(&clock)).await;

    fleet.spawn_health_loop().unwrap();
    assert!(fleet.spawn_health_loop().is_err());
    clock.wait_for_sleeps(1).await;

    fleet.shutdown().await;

    // Once idle again the loop may be restarted
    fleet.spawn_health_loop().unwrap();
    clock.wait_for_sleeps(2).await;
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_failed_cycle_backs_off_and_loop_continues() {
    let clock = Arc::new(ScriptedClock::new());
    let fleet = started_fleet(Arc::clone(&clock)).await;
    let settings = fleet.settings().clone();

    // The first server check of the first cycle fails
    clock.fail_next_now.store(true, Ordering::SeqCst);
    fleet.spawn_health_loop().unwrap();

    tokio::time::timeout(Duration::from_secs(10), clock.wait_for_sleeps(1))
        .await
        .unwrap();
    assert_eq!(clock.sleeps()[0], settings.error_backoff());
    assert_eq!(fleet.state(), FleetState::Running);
    assert!(!fleet.health_loop_finished());

    // A clean cycle goes back to the regular interval
    clock.ticks.add_permits(1);
    tokio::time::timeout(Duration::from_secs(10), clock.wait_for_sleeps(2))
        .await
        .unwrap();
    assert_eq!(clock.sleeps()[1], settings.check_interval());
    assert!(!fleet.health_loop_finished());

    let results = fleet.shutdown().await;
    assert!(results.values().all(|r| r.is_ok()));
}

#[tokio::test]
async fn test_crashed_loop_is_surfaced() {
    let clock = Arc::new(ScriptedClock::new());
    let fleet = started_fleet(Arc::clone(&clock)).await;

    clock.fail_sleeps.store(true, Ordering::SeqCst);
    fleet.spawn_health_loop().unwrap();

    tokio::time::timeout(Duration::from_secs(10), async {
        while !fleet.health_loop_finished() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("crashed loop should be reported as finished");

    assert_eq!(fleet.state(), FleetState::Idle);

    // Servers keep running and the loop can be brought back
    let status = fleet.get_fleet_status().await;
    assert!(status.values().all(|s| s.status == HealthStatus::Healthy));

    clock.fail_sleeps.store(false, Ordering::SeqCst);
    fleet.spawn_health_loop().unwrap();
    tokio::time::timeout(Duration::from_secs(10), clock.wait_for_sleeps(2))
        .await
        .unwrap();
    assert!(!fleet.health_loop_finished());

    fleet.shutdown().await;
}
