// CLI module - User-facing command-line interface

mod output;

use crate::config::FleetConfig;
use crate::error::Result;
use crate::insights::InsightGenerator;
use crate::process::{HealthSnapshot, HealthStatus, HostMonitor, ProcessState};
use crate::security::risk::RESTART_SERVER;
use crate::security::{OperationRequest, RiskPolicy, SecurityGate};
use crate::supervisor::FleetSupervisor;
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Steward - supervise a fleet of servers behind a risk-gated approval workflow
#[derive(Parser)]
#[command(name = "steward")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the fleet and supervise it until interrupted
    Run {
        /// Fleet configuration file (.toml or .json)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Validate a configuration and show how each server would be gated
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Show the risk policy
    Policy {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Sample host metrics and show the insights a fully offline fleet would produce
    Insights {
        #[arg(short, long)]
        config: PathBuf,

        /// Print insights as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Execute the parsed command
    pub async fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Run { config } => run_fleet(config).await,
            Commands::Validate { config } => {
                let config = FleetConfig::from_file(config)?;
                let gate = SecurityGate::new(config.policy.clone());
                output::print_server_table(&config.servers, &gate);
                output::print_success_msg("Configuration is valid");
                Ok(())
            }
            Commands::Policy { config } => {
                let config = FleetConfig::from_file(config)?;
                output::print_policy_table(&config.policy);
                Ok(())
            }
            Commands::Insights { config, json } => dry_run_insights(config, *json).await,
        }
    }

    /// Default tracing filter for the requested verbosity
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "info,steward=debug",
            2 => "debug",
            _ => "trace",
        }
    }
}

async fn run_fleet(path: &Path) -> Result<()> {
    let config = FleetConfig::from_file(path)?;
    let supervisor = Arc::new(FleetSupervisor::from_config(&config).await?);

    output::print_info(&format!(
        "Starting {} server(s)",
        supervisor.server_names().await.len()
    ));
    let started = supervisor.start_all().await;
    output::print_results("started", &started);

    if let Some(notice) = unattended_restart_notice(&config.policy) {
        warn!("{}", notice);
        output::print_info(&notice);
    }

    supervisor.spawn_health_loop()?;

    let mut announced = HashSet::new();
    let mut ticker = tokio::time::interval(supervisor.settings().check_interval());
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Interrupt received, shutting down");
                break;
            }
            _ = wait_for_loop_exit(&supervisor) => {
                output::print_error("Health-check loop stopped unexpectedly; shutting down the fleet");
                break;
            }
            _ = ticker.tick() => {
                let fresh = unannounced(supervisor.list_pending_approvals(), &mut announced);
                if !fresh.is_empty() {
                    output::print_pending_approvals(&fresh);
                }
            }
        }
    }

    let status = supervisor.get_fleet_status().await;
    output::print_status_table(&status);

    let stopped = supervisor.shutdown().await;
    output::print_results("stopped", &stopped);

    let pending = supervisor.list_pending_approvals();
    if !pending.is_empty() {
        output::print_info(&format!(
            "{} approval request(s) were still pending and have been discarded",
            pending.len()
        ));
    }

    Ok(())
}

/// Warning for runs where offline servers can only collect approval requests
fn unattended_restart_notice(policy: &RiskPolicy) -> Option<String> {
    let tier = policy.base_tier(RESTART_SERVER);
    (!tier.is_auto_allowed()).then(|| {
        format!(
            "{} is {} risk: offline servers will wait for approvals that this command cannot grant. \
             Set it to \"low\" under [policy.operations] for unattended runs",
            RESTART_SERVER, tier
        )
    })
}

/// Pending requests not shown yet; records them as shown
fn unannounced(
    pending: Vec<OperationRequest>,
    announced: &mut HashSet<String>,
) -> Vec<OperationRequest> {
    pending
        .into_iter()
        .filter(|request| announced.insert(request.id.clone()))
        .collect()
}

async fn wait_for_loop_exit(supervisor: &FleetSupervisor) {
    while !supervisor.health_loop_finished() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

async fn dry_run_insights(path: &Path, json: bool) -> Result<()> {
    let config = FleetConfig::from_file(path)?;
    let gate = SecurityGate::new(config.policy.clone());

    let now = Utc::now();
    let status: BTreeMap<String, HealthSnapshot> = config
        .enabled_servers()
        .map(|spec| {
            let snapshot = HealthSnapshot {
                name: spec.name.clone(),
                status: HealthStatus::Offline,
                state: ProcessState::Offline,
                uptime_secs: 0,
                restart_count: 0,
                pid: None,
                checked_at: now,
            };
            (spec.name.clone(), snapshot)
        })
        .collect();

    let metrics = HostMonitor::new().sample().await;
    let insights = InsightGenerator::default().derive(&gate, &status, &metrics);

    if json {
        let rendered = serde_json::to_string_pretty(&insights)
            .map_err(|e| crate::error::StewardError::Internal(e.to_string()))?;
        println!("{}", rendered);
    } else {
        output::print_insights(&metrics, &insights);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from(["steward", "run", "--config", "fleet.toml"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { ref config } if config == Path::new("fleet.toml")));
        assert_eq!(cli.log_filter(), "info");
    }

    #[test]
    fn test_verbosity_levels() {
        let cli = Cli::try_parse_from(["steward", "-vv", "policy", "-c", "fleet.toml"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_filter(), "debug");
    }

    #[test]
    fn test_insights_json_flag() {
        let cli =
            Cli::try_parse_from(["steward", "insights", "-c", "fleet.json", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Insights { json: true, .. }));
    }

    #[test]
    fn test_unattended_notice_follows_restart_tier() {
        let policy = RiskPolicy::default();
        let notice = unattended_restart_notice(&policy).unwrap();
        assert!(notice.contains(RESTART_SERVER));

        let mut unattended = RiskPolicy::default();
        unattended
            .operations
            .insert(RESTART_SERVER.to_string(), crate::security::RiskLevel::Low);
        assert!(unattended_restart_notice(&unattended).is_none());
    }

    #[test]
    fn test_pending_requests_are_announced_once() {
        let gate = SecurityGate::new(RiskPolicy::default());
        let first = gate.create_approval_request(
            RESTART_SERVER,
            crate::security::server_params("files"),
            "fleet-supervisor",
            None,
        );
        let mut announced = HashSet::new();

        let fresh = unannounced(gate.list_pending(), &mut announced);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].id, first.id);

        let second = gate.create_approval_request(
            RESTART_SERVER,
            crate::security::server_params("search"),
            "fleet-supervisor",
            None,
        );
        let fresh = unannounced(gate.list_pending(), &mut announced);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].id, second.id);

        assert!(unannounced(gate.list_pending(), &mut announced).is_empty());
    }

    #[test]
    fn test_config_is_required() {
        assert!(Cli::try_parse_from(["steward", "run"]).is_err());
    }
}
