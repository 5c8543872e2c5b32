use crate::config::{FleetConfig, LaunchSpec, SupervisorSettings};
use crate::error::{Result, StewardError};
use crate::insights::{InsightGenerator, InsightThresholds};
use crate::process::{HealthSnapshot, HealthStatus, ProcessHandle};
use crate::security::risk::{server_params, RESTART_SERVER};
use crate::security::{GateDecision, SecurityGate};
use crate::supervisor::clock::{Clock, SystemClock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Requester identity recorded on approvals raised by the health-check loop
pub const SUPERVISOR_REQUESTER: &str = "fleet-supervisor";

pub(crate) type SharedHandle = Arc<Mutex<ProcessHandle>>;

/// One registered server: the lockable handle plus its published snapshot
struct ServerEntry {
    handle: SharedHandle,
    status: watch::Receiver<HealthSnapshot>,
}

/// Lifecycle of the fleet as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FleetState {
    Idle,
    Running,
    Stopping,
}

/// What one health-check cycle did for one server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ServerOutcome {
    Healthy,
    /// Not remediated: status unknown, or offline with auto-restart disabled
    Skipped,
    Restarted,
    RestartFailed(String),
    /// Restart needs approval; carries the pending request id
    AwaitingApproval(String),
    /// Server is restricted; nothing will be attempted
    Restricted,
    /// The per-server check itself failed
    Errored(String),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub outcomes: BTreeMap<String, ServerOutcome>,
}

impl CycleReport {
    pub fn outcome(&self, server: &str) -> Option<&ServerOutcome> {
        self.outcomes.get(server)
    }

    pub fn restarted(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| **o == ServerOutcome::Restarted)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.outcomes
            .values()
            .any(|o| matches!(o, ServerOutcome::Errored(_)))
    }
}

/// Owns every supervised server and the health-check loop that remediates them
pub struct FleetSupervisor {
    servers: RwLock<BTreeMap<String, ServerEntry>>,
    gate: Arc<SecurityGate>,
    pub(crate) insights: InsightGenerator,
    settings: SupervisorSettings,
    clock: Arc<dyn Clock>,
    state: watch::Sender<FleetState>,
    loop_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl FleetSupervisor {
    pub fn new(settings: SupervisorSettings, gate: Arc<SecurityGate>) -> Self {
        let (state, _) = watch::channel(FleetState::Idle);
        Self {
            servers: RwLock::new(BTreeMap::new()),
            gate,
            insights: InsightGenerator::default(),
            settings,
            clock: Arc::new(SystemClock),
            state,
            loop_task: std::sync::Mutex::new(None),
        }
    }

    /// Build a supervisor and register every enabled server of a config
    pub async fn from_config(config: &FleetConfig) -> Result<Self> {
        let gate = Arc::new(SecurityGate::new(config.policy.clone()));
        let supervisor = Self::new(config.supervisor.clone(), gate);
        supervisor.load_and_register(config.servers.clone()).await?;
        Ok(supervisor)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_insight_thresholds(mut self, thresholds: InsightThresholds) -> Self {
        self.insights = InsightGenerator::new(thresholds);
        self
    }

    pub fn gate(&self) -> &Arc<SecurityGate> {
        &self.gate
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn state(&self) -> FleetState {
        *self.state.borrow()
    }

    /// Register one handle per enabled spec; disabled specs are skipped entirely.
    ///
    /// Returns the number of servers registered. Names must not collide with
    /// each other or with servers already registered; on a collision nothing
    /// is registered.
    pub async fn load_and_register<I>(&self, specs: I) -> Result<usize>
    where
        I: IntoIterator<Item = LaunchSpec>,
    {
        let mut servers = self.servers.write().await;

        let mut enabled = Vec::new();
        for spec in specs {
            if spec.disabled {
                debug!(server = %spec.name, "Skipping disabled server");
                continue;
            }
            if servers.contains_key(&spec.name) || enabled.iter().any(|s: &LaunchSpec| s.name == spec.name) {
                return Err(StewardError::ServerAlreadyExists(spec.name));
            }
            enabled.push(spec);
        }

        let count = enabled.len();
        for spec in enabled {
            info!(server = %spec.name, command = %spec.command, "Registering server");
            let name = spec.name.clone();
            let handle = ProcessHandle::from_settings(spec, &self.settings);
            let entry = ServerEntry {
                status: handle.subscribe(),
                handle: Arc::new(Mutex::new(handle)),
            };
            servers.insert(name, entry);
        }

        Ok(count)
    }

    pub async fn server_names(&self) -> Vec<String> {
        self.servers.read().await.keys().cloned().collect()
    }

    pub(crate) async fn handle(&self, name: &str) -> Result<SharedHandle> {
        self.servers
            .read()
            .await
            .get(name)
            .map(|entry| Arc::clone(&entry.handle))
            .ok_or_else(|| StewardError::ServerNotFound(name.to_string()))
    }

    async fn handles(&self) -> Vec<(String, SharedHandle)> {
        self.servers
            .read()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(&entry.handle)))
            .collect()
    }

    /// Start every registered server concurrently. One server failing to start
    /// does not affect the others; each result is reported under its name.
    pub async fn start_all(&self) -> BTreeMap<String, Result<()>> {
        let tasks: Vec<_> = self
            .handles()
            .await
            .into_iter()
            .map(|(name, handle)| {
                let task = tokio::spawn(async move { handle.lock().await.start().await });
                (name, task)
            })
            .collect();

        let results = collect_results(tasks).await;
        for (name, result) in &results {
            if let Err(e) = result {
                error!(server = %name, "Failed to start server: {}", e);
            }
        }
        info!(
            "Started {}/{} servers",
            results.values().filter(|r| r.is_ok()).count(),
            results.len()
        );
        results
    }

    /// Stop every registered server concurrently, each with its own grace period
    pub async fn stop_all(&self) -> BTreeMap<String, Result<()>> {
        let tasks: Vec<_> = self
            .handles()
            .await
            .into_iter()
            .map(|(name, handle)| {
                let task = tokio::spawn(async move {
                    let mut handle = handle.lock().await;
                    let grace = handle.spec().stop_timeout();
                    handle.stop(grace).await
                });
                (name, task)
            })
            .collect();

        let results = collect_results(tasks).await;
        for (name, result) in &results {
            if let Err(e) = result {
                error!(server = %name, "Failed to stop server: {}", e);
            }
        }
        results
    }

    /// Health snapshot of every server. Probes liveness but never restarts
    /// anything.
    ///
    /// Never waits on a lifecycle operation: a server whose handle is busy
    /// (mid-restart, for example) reports its last published snapshot.
    pub async fn get_status(&self) -> BTreeMap<String, HealthSnapshot> {
        let servers = self.servers.read().await;
        servers
            .iter()
            .map(|(name, entry)| {
                let snapshot = match entry.handle.try_lock() {
                    Ok(mut handle) => handle.health_check_at(self.clock.now()),
                    Err(_) => entry.status.borrow().clone(),
                };
                (name.clone(), snapshot)
            })
            .collect()
    }

    /// Run one health-check cycle over every server.
    ///
    /// Servers are checked concurrently, each in its own task, so a panic or a
    /// slow restart on one server is isolated from the rest.
    pub async fn run_cycle(&self) -> CycleReport {
        let tasks: Vec<_> = self
            .handles()
            .await
            .into_iter()
            .map(|(name, handle)| {
                let gate = Arc::clone(&self.gate);
                let clock = Arc::clone(&self.clock);
                let task =
                    tokio::spawn(async move { check_server(&gate, clock.as_ref(), &handle).await });
                (name, task)
            })
            .collect();

        let mut report = CycleReport::default();
        for (name, task) in tasks {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(server = %name, "Health check task failed: {}", e);
                    ServerOutcome::Errored(e.to_string())
                }
            };
            report.outcomes.insert(name, outcome);
        }

        debug!(
            servers = report.outcomes.len(),
            restarted = report.restarted(),
            "Health-check cycle complete"
        );
        report
    }

    /// The continuous health-check loop. Runs while the fleet is `Running`;
    /// a state change interrupts the sleep between cycles but never a cycle
    /// already under way.
    pub async fn health_check_loop(self: Arc<Self>) {
        let mut state_rx = self.state.subscribe();
        info!(
            "Health-check loop started (interval: {}s)",
            self.settings.check_interval_secs
        );

        loop {
            if *state_rx.borrow_and_update() != FleetState::Running {
                break;
            }

            let report = self.run_cycle().await;
            let pause = if report.has_errors() {
                warn!(
                    "Health-check cycle had errors, backing off for {:?}",
                    self.settings.error_backoff()
                );
                self.settings.error_backoff()
            } else {
                self.settings.check_interval()
            };

            tokio::select! {
                _ = self.clock.sleep(pause) => {}
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Health-check loop stopped");
    }

    /// Move the fleet to `Running` and spawn the health-check loop in the background
    pub fn spawn_health_loop(self: &Arc<Self>) -> Result<()> {
        let mut task_slot = self.loop_task.lock().unwrap_or_else(|e| e.into_inner());
        let loop_alive = task_slot.as_ref().is_some_and(|task| !task.is_finished());
        if self.state() != FleetState::Idle || loop_alive {
            return Err(StewardError::Internal(
                "health-check loop already running".to_string(),
            ));
        }

        self.state.send_replace(FleetState::Running);

        let supervisor = Arc::clone(self);
        *task_slot = Some(tokio::spawn(async move {
            let inner = tokio::spawn(Arc::clone(&supervisor).health_check_loop());
            if let Err(e) = inner.await {
                error!(
                    "Health-check loop terminated abnormally: {}. Automatic remediation has stopped",
                    e
                );
                supervisor.state.send_replace(FleetState::Idle);
            }
        }));

        Ok(())
    }

    /// Whether the background loop has exited on its own (e.g. after a crash)
    pub fn health_loop_finished(&self) -> bool {
        self.loop_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|task| task.is_finished())
            .unwrap_or(true)
    }

    /// Stop the fleet: halt the loop (letting an in-flight cycle finish), then
    /// stop every server. Returns the per-server stop results.
    pub async fn shutdown(&self) -> BTreeMap<String, Result<()>> {
        info!("Shutting down fleet supervisor");
        self.state.send_replace(FleetState::Stopping);

        let task = self
            .loop_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Health-check loop supervisor task failed: {}", e);
            }
        }

        let results = self.stop_all().await;
        self.state.send_replace(FleetState::Idle);
        info!("Fleet supervisor stopped");
        results
    }
}

/// One server's part of a health-check cycle. Holds the server's lock for
/// the whole check so it cannot race a manual restart of the same server.
async fn check_server(
    gate: &SecurityGate,
    clock: &dyn Clock,
    handle: &Mutex<ProcessHandle>,
) -> ServerOutcome {
    let mut handle = handle.lock().await;
    let snapshot = handle.health_check_at(clock.now());

    match snapshot.status {
        HealthStatus::Healthy => return ServerOutcome::Healthy,
        HealthStatus::Unknown => return ServerOutcome::Skipped,
        HealthStatus::Offline => {}
    }

    let name = handle.name().to_string();
    if !handle.spec().auto_restart {
        debug!(server = %name, "Server offline, auto-restart disabled");
        return ServerOutcome::Skipped;
    }

    let params = server_params(&name);
    let decision = gate.can_perform(RESTART_SERVER, &params);

    if decision.allowed {
        return match execute_restart(gate, &mut handle, &decision).await {
            Ok(()) => ServerOutcome::Restarted,
            Err(e) => {
                error!(server = %name, "Automatic restart failed: {}", e);
                ServerOutcome::RestartFailed(e.to_string())
            }
        };
    }

    if decision.is_restricted() {
        warn!(server = %name, "Server offline but restricted: {}", decision.reason);
        return ServerOutcome::Restricted;
    }

    let request = match gate.find_pending(RESTART_SERVER, &params) {
        Some(existing) => existing,
        None => gate.create_approval_request(
            RESTART_SERVER,
            params,
            SUPERVISOR_REQUESTER,
            Some(format!(
                "Health check found server '{}' offline (restarts so far: {})",
                name, snapshot.restart_count
            )),
        ),
    };
    info!(
        server = %name,
        approval_id = %request.id,
        "Server offline, restart awaiting approval"
    );
    ServerOutcome::AwaitingApproval(request.id)
}

/// Run a permitted restart, spending the approval that allowed it
pub(crate) async fn execute_restart(
    gate: &SecurityGate,
    handle: &mut ProcessHandle,
    decision: &GateDecision,
) -> Result<()> {
    if let Some(approval_id) = decision.approval_id() {
        gate.consume_approval(approval_id);
    }
    let grace = handle.spec().stop_timeout();
    handle.restart(grace).await
}

async fn collect_results(
    tasks: Vec<(String, JoinHandle<Result<()>>)>,
) -> BTreeMap<String, Result<()>> {
    let mut results = BTreeMap::new();
    for (name, task) in tasks {
        let result = task
            .await
            .unwrap_or_else(|e| Err(StewardError::Internal(format!("task failed: {}", e))));
        results.insert(name, result);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessState;
    use crate::security::RiskPolicy;

    fn fast_settings() -> SupervisorSettings {
        SupervisorSettings {
            check_interval_secs: 1,
            startup_grace_ms: 100,
            restart_settle_ms: 20,
            error_backoff_secs: 1,
        }
    }

    fn sleeper(name: &str) -> LaunchSpec {
        let mut spec = LaunchSpec::new(name, "/bin/sleep").with_args(["30"]);
        spec.stop_timeout_secs = 2;
        spec
    }

    fn supervisor(policy: RiskPolicy) -> FleetSupervisor {
        FleetSupervisor::new(fast_settings(), Arc::new(SecurityGate::new(policy)))
    }

    #[tokio::test]
    async fn test_disabled_specs_are_never_registered() {
        let fleet = supervisor(RiskPolicy::default());
        let mut disabled = sleeper("legacy");
        disabled.disabled = true;

        let count = fleet
            .load_and_register(vec![sleeper("files"), disabled])
            .await
            .unwrap();

        assert_eq!(count, 1);
        assert_eq!(fleet.server_names().await, vec!["files".to_string()]);
        assert!(fleet.get_status().await.get("legacy").is_none());
        assert!(matches!(
            fleet.handle("legacy").await,
            Err(StewardError::ServerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let fleet = supervisor(RiskPolicy::default());
        fleet.load_and_register(vec![sleeper("files")]).await.unwrap();

        let result = fleet
            .load_and_register(vec![sleeper("search"), sleeper("files")])
            .await;
        assert!(matches!(result, Err(StewardError::ServerAlreadyExists(_))));
        assert_eq!(fleet.server_names().await.len(), 1);
    }

    #[tokio::test]
    async fn test_start_all_isolates_failures() {
        let fleet = supervisor(RiskPolicy::default());
        fleet
            .load_and_register(vec![
                sleeper("files"),
                LaunchSpec::new("broken", "/nonexistent/server"),
            ])
            .await
            .unwrap();

        let results = fleet.start_all().await;
        assert!(results["files"].is_ok());
        assert!(results["broken"].is_err());

        let status = fleet.get_status().await;
        assert_eq!(status["files"].status, HealthStatus::Healthy);
        assert_eq!(status["broken"].status, HealthStatus::Offline);

        let stopped = fleet.stop_all().await;
        assert!(stopped.values().all(|r| r.is_ok()));
        assert_eq!(
            fleet.handle("files").await.unwrap().lock().await.state(),
            ProcessState::Stopped
        );
    }

    #[tokio::test]
    async fn test_cycle_skips_unknown_and_manual_servers() {
        let fleet = supervisor(RiskPolicy::default());
        let mut manual = LaunchSpec::new("manual", "/nonexistent/server");
        manual.auto_restart = false;
        fleet
            .load_and_register(vec![sleeper("idle"), manual])
            .await
            .unwrap();
        let _ = fleet.handle("manual").await.unwrap().lock().await.start().await;

        let report = fleet.run_cycle().await;
        assert_eq!(report.outcome("idle"), Some(&ServerOutcome::Skipped));
        assert_eq!(report.outcome("manual"), Some(&ServerOutcome::Skipped));
        assert!(fleet.gate().list_pending().is_empty());
    }

    #[tokio::test]
    async fn test_restricted_server_is_never_restarted() {
        let fleet = supervisor(RiskPolicy::default().with_restricted(["payments"]));
        fleet
            .load_and_register(vec![LaunchSpec::new("payments", "/nonexistent/server")])
            .await
            .unwrap();
        let _ = fleet.start_all().await;

        let report = fleet.run_cycle().await;
        assert_eq!(report.outcome("payments"), Some(&ServerOutcome::Restricted));
        assert!(fleet.gate().list_pending().is_empty());
    }

    #[tokio::test]
    async fn test_auto_allowed_restart_runs_immediately() {
        let mut policy = RiskPolicy::default();
        policy
            .operations
            .insert(RESTART_SERVER.to_string(), crate::security::RiskLevel::Low);
        let fleet = supervisor(policy);

        let temp_dir = tempfile::TempDir::new().unwrap();
        let marker = temp_dir.path().join("up");
        let script = format!(
            "if [ -e {m} ]; then exec sleep 30; fi; touch {m}; exit 1",
            m = marker.display()
        );
        fleet
            .load_and_register(vec![LaunchSpec::new("flaky", "/bin/sh").with_args(["-c", script.as_str()])])
            .await
            .unwrap();
        assert!(fleet.start_all().await["flaky"].is_err());

        let report = fleet.run_cycle().await;
        assert_eq!(report.outcome("flaky"), Some(&ServerOutcome::Restarted));
        assert_eq!(fleet.get_status().await["flaky"].restart_count, 1);

        fleet.stop_all().await;
    }

    #[tokio::test]
    async fn test_shutdown_without_loop() {
        let fleet = supervisor(RiskPolicy::default());
        fleet.load_and_register(vec![sleeper("files")]).await.unwrap();
        fleet.start_all().await;

        let results = fleet.shutdown().await;
        assert!(results["files"].is_ok());
        assert_eq!(fleet.state(), FleetState::Idle);
    }
}
