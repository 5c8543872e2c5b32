use crate::config::{LaunchSpec, SupervisorSettings};
use crate::error::{Result, StewardError};
use crate::process::spawner::spawn_process;
use crate::process::types::{HealthSnapshot, HealthStatus, ProcessState};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Owner of one supervised OS process.
///
/// All state is private and only changes through the methods below, which
/// keeps `pid` set exactly while the state is `Running`.
#[derive(Debug)]
pub struct ProcessHandle {
    spec: LaunchSpec,
    state: ProcessState,
    child: Option<Child>,
    pid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
    restart_count: u64,
    /// Whether the server is expected to be up (set by start, cleared by stop)
    wanted: bool,
    last_health_check_at: Option<DateTime<Utc>>,
    health_status: HealthStatus,
    startup_grace: Duration,
    restart_settle: Duration,
    /// Latest snapshot, readable without locking the handle
    status_tx: watch::Sender<HealthSnapshot>,
}

impl ProcessHandle {
    pub fn from_settings(spec: LaunchSpec, settings: &SupervisorSettings) -> Self {
        Self::with_timing(spec, settings.startup_grace(), settings.restart_settle())
    }

    pub fn with_timing(spec: LaunchSpec, startup_grace: Duration, restart_settle: Duration) -> Self {
        let (status_tx, _) = watch::channel(HealthSnapshot {
            name: spec.name.clone(),
            status: HealthStatus::Unknown,
            state: ProcessState::Stopped,
            uptime_secs: 0,
            restart_count: 0,
            pid: None,
            checked_at: Utc::now(),
        });

        Self {
            spec,
            state: ProcessState::Stopped,
            child: None,
            pid: None,
            started_at: None,
            restart_count: 0,
            wanted: false,
            last_health_check_at: None,
            health_status: HealthStatus::Unknown,
            startup_grace,
            restart_settle,
            status_tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn restart_count(&self) -> u64 {
        self.restart_count
    }

    pub fn health_status(&self) -> HealthStatus {
        self.health_status
    }

    pub fn last_health_check_at(&self) -> Option<DateTime<Utc>> {
        self.last_health_check_at
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.spec.log_file.as_deref()
    }

    /// Follow this server's snapshot as it changes. Every state transition
    /// and health check publishes a new value.
    pub fn subscribe(&self) -> watch::Receiver<HealthSnapshot> {
        self.status_tx.subscribe()
    }

    /// Start the server. Succeeds immediately if it is already running.
    ///
    /// After spawning, waits out the startup grace period; a child that has
    /// already exited by then is reported as `ExitedEarly` and the handle is
    /// left `Stopped`.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            debug!(server = %self.spec.name, "Start skipped: already running");
            return Ok(());
        }

        self.wanted = true;
        self.clear_process();
        self.set_state(ProcessState::Starting);

        let spawned = match spawn_process(&self.spec) {
            Ok(spawned) => spawned,
            Err(e) => {
                self.set_state(ProcessState::Stopped);
                return Err(e);
            }
        };
        let spawned_at = Utc::now();
        let mut child = spawned.child;

        tokio::time::sleep(self.startup_grace).await;

        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                self.set_state(ProcessState::Stopped);
                warn!(
                    server = %self.spec.name,
                    pid = spawned.pid,
                    "Server exited during startup: {}",
                    status
                );
                return Err(StewardError::ExitedEarly {
                    name: self.spec.name.clone(),
                    exit_info: status.to_string(),
                });
            }
            Err(e) => {
                let _ = child.start_kill();
                self.set_state(ProcessState::Stopped);
                return Err(StewardError::SpawnError(
                    self.spec.name.clone(),
                    format!("liveness probe failed: {}", e),
                ));
            }
        }

        self.child = Some(child);
        self.pid = Some(spawned.pid);
        self.started_at = Some(spawned_at);
        self.set_state(ProcessState::Running);

        info!(server = %self.spec.name, pid = spawned.pid, "Server started");
        Ok(())
    }

    /// Stop the server: termination signal, wait up to `grace_period`, then a
    /// single forced kill. Succeeds immediately if it is not running.
    pub async fn stop(&mut self, grace_period: Duration) -> Result<()> {
        self.wanted = false;

        let Some(mut child) = self.child.take() else {
            self.clear_process();
            return Ok(());
        };

        if !matches!(child.try_wait(), Ok(None)) {
            debug!(server = %self.spec.name, "Stop found server already exited");
            self.clear_process();
            return Ok(());
        }

        let pid = self.pid.unwrap_or_default();
        let name = self.spec.name.clone();
        self.set_state(ProcessState::Stopping);

        info!(server = %name, pid, "Gracefully stopping server");

        let exited = match send_terminate(pid) {
            Ok(()) => match tokio::time::timeout(grace_period, child.wait()).await {
                Ok(Ok(status)) => {
                    info!(server = %name, "Server exited gracefully with status: {}", status);
                    true
                }
                Ok(Err(e)) => {
                    warn!(server = %name, "Waiting for graceful exit failed: {}", e);
                    false
                }
                Err(_) => {
                    warn!(
                        server = %name,
                        "Server did not exit within {:?}, sending SIGKILL",
                        grace_period
                    );
                    false
                }
            },
            Err(e) => {
                warn!(server = %name, "Termination signal failed ({}), sending SIGKILL", e);
                false
            }
        };

        if !exited {
            if let Err(e) = child.kill().await {
                error!(server = %name, "Forced kill failed: {}", e);
                self.child = Some(child);
                self.set_state(ProcessState::Running);
                return Err(StewardError::StopError(
                    name,
                    format!("forced kill failed: {}", e),
                ));
            }
        }

        self.clear_process();
        info!(server = %name, "Server stopped");
        Ok(())
    }

    /// Stop, wait the settle delay, then start. The restart counter only
    /// moves when the new start succeeds.
    pub async fn restart(&mut self, grace_period: Duration) -> Result<()> {
        self.stop(grace_period).await?;
        tokio::time::sleep(self.restart_settle).await;
        self.start().await?;

        self.restart_count += 1;
        self.publish();
        info!(
            server = %self.spec.name,
            restarts = self.restart_count,
            "Server restarted"
        );
        Ok(())
    }

    /// Whether the tracked child is alive. Probe failures count as not running.
    pub fn is_running(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };

        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(server = %self.spec.name, "Server has exited: {}", status);
                false
            }
            Err(e) => {
                warn!(server = %self.spec.name, "Liveness probe failed: {}", e);
                false
            }
        }
    }

    /// Probe liveness and record the outcome.
    ///
    /// A `Running` server found dead moves to `Offline`. A `Stopped` server
    /// that is still wanted (its last start failed) reports offline, while a
    /// deliberately stopped or transitioning one reports unknown.
    pub fn health_check(&mut self) -> HealthSnapshot {
        self.health_check_at(Utc::now())
    }

    /// [`health_check`](Self::health_check) stamped with the caller's clock
    pub fn health_check_at(&mut self, now: DateTime<Utc>) -> HealthSnapshot {
        if self.state == ProcessState::Running && !self.is_running() {
            warn!(server = %self.spec.name, pid = ?self.pid, "Server is no longer running");
            self.mark_offline();
        }

        self.last_health_check_at = Some(now);
        self.health_status = self.implied_health();
        self.publish();
        self.snapshot()
    }

    /// Last recorded health, without probing
    pub fn snapshot(&self) -> HealthSnapshot {
        let now = Utc::now();
        let uptime_secs = match (self.state, self.started_at) {
            (ProcessState::Running, Some(started)) => {
                now.signed_duration_since(started).num_seconds().max(0) as u64
            }
            _ => 0,
        };

        HealthSnapshot {
            name: self.spec.name.clone(),
            status: self.health_status,
            state: self.state,
            uptime_secs,
            restart_count: self.restart_count,
            pid: self.pid,
            checked_at: self.last_health_check_at.unwrap_or(now),
        }
    }

    /// Move to `state`, recording the health it implies without probing
    fn set_state(&mut self, state: ProcessState) {
        self.state = state;
        self.health_status = self.implied_health();
        self.publish();
    }

    fn implied_health(&self) -> HealthStatus {
        match self.state {
            ProcessState::Running => HealthStatus::Healthy,
            ProcessState::Offline => HealthStatus::Offline,
            ProcessState::Stopped if self.wanted => HealthStatus::Offline,
            ProcessState::Stopped | ProcessState::Starting | ProcessState::Stopping => {
                HealthStatus::Unknown
            }
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.snapshot());
    }

    fn mark_offline(&mut self) {
        self.child = None;
        self.pid = None;
        self.started_at = None;
        self.set_state(ProcessState::Offline);
    }

    fn clear_process(&mut self) {
        self.child = None;
        self.pid = None;
        self.started_at = None;
        self.set_state(ProcessState::Stopped);
    }
}

#[cfg(unix)]
fn send_terminate(pid: u32) -> Result<()> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    if pid == 0 {
        return Err(StewardError::SignalError("no PID tracked".to_string()));
    }

    signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| StewardError::SignalError(format!("Failed to send SIGTERM: {}", e)))
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32) -> Result<()> {
    Err(StewardError::SignalError(
        "graceful termination is not supported on this platform".to_string(),
    ))
}
