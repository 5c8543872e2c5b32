// Output formatting and display for CLI

use crate::config::LaunchSpec;
use crate::error::Result;
use crate::insights::{Insight, InsightType, Remediation, ResourceMetrics};
use crate::process::{HealthSnapshot, HealthStatus};
use crate::security::{OperationRequest, RiskLevel, RiskPolicy, SecurityGate};
use crate::security::risk::{server_params, RESTART_SERVER, SERVER_PARAM};
use colored::*;
use std::collections::BTreeMap;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a success message
pub fn print_success_msg(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print per-server results of a fleet-wide operation
pub fn print_results(action: &str, results: &BTreeMap<String, Result<()>>) {
    for (name, result) in results {
        match result {
            Ok(()) => println!("  {} {} {}", "✓".green(), action, name.cyan()),
            Err(e) => println!("  {} {} {}: {}", "✗".red(), action, name.cyan(), e),
        }
    }
}

/// Print configured servers with the restart decision the gate would make
pub fn print_server_table(servers: &[LaunchSpec], gate: &SecurityGate) {
    #[derive(Tabled)]
    struct ServerRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Command")]
        command: String,
        #[tabled(rename = "Enabled")]
        enabled: String,
        #[tabled(rename = "Auto-restart")]
        auto_restart: String,
        #[tabled(rename = "Grace")]
        grace: String,
        #[tabled(rename = "Restart risk")]
        risk: String,
    }

    if servers.is_empty() {
        println!("{}", "No servers configured".yellow());
        return;
    }

    let rows: Vec<ServerRow> = servers
        .iter()
        .map(|s| {
            let decision = gate.can_perform(RESTART_SERVER, &server_params(&s.name));
            let risk = if decision.is_restricted() {
                format!("{} (restricted)", format_risk_colored(decision.risk))
            } else {
                format_risk_colored(decision.risk)
            };

            ServerRow {
                name: truncate(&s.name, 20),
                command: truncate(&format!("{} {}", s.command, s.args.join(" ")), 40),
                enabled: yes_no(!s.disabled),
                auto_restart: yes_no(s.auto_restart),
                grace: format_duration(&s.stop_timeout()),
                risk,
            }
        })
        .collect();

    print_table(Table::new(rows));
    println!(
        "{}",
        format!("Total: {} server(s)", servers.len())
            .dimmed()
            .italic()
    );
}

/// Print the risk policy: operation tiers, then restricted servers
pub fn print_policy_table(policy: &RiskPolicy) {
    #[derive(Tabled)]
    struct PolicyRow {
        #[tabled(rename = "Operation")]
        operation: String,
        #[tabled(rename = "Tier")]
        tier: String,
        #[tabled(rename = "Approval")]
        approval: String,
    }

    let mut operations: Vec<_> = policy.operations.iter().collect();
    operations.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));

    let rows: Vec<PolicyRow> = operations
        .into_iter()
        .map(|(operation, tier)| PolicyRow {
            operation: operation.clone(),
            tier: format_risk_colored(*tier),
            approval: if tier.is_auto_allowed() {
                "not required".to_string()
            } else {
                "required".yellow().to_string()
            },
        })
        .collect();

    print_table(Table::new(rows));
    println!(
        "  {:<20} {}",
        "Unlisted operations:".bold(),
        format_risk_colored(policy.default_tier)
    );

    let mut restricted: Vec<_> = policy.restricted_servers.iter().cloned().collect();
    restricted.sort();
    if restricted.is_empty() {
        println!("  {:<20} {}", "Restricted servers:".bold(), "none".dimmed());
    } else {
        println!(
            "  {:<20} {}",
            "Restricted servers:".bold(),
            restricted.join(", ").red()
        );
    }
    println!();
}

/// Print a fleet status table
pub fn print_status_table(status: &BTreeMap<String, HealthSnapshot>) {
    #[derive(Tabled)]
    struct StatusRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Health")]
        health: String,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "Uptime")]
        uptime: String,
        #[tabled(rename = "Restarts")]
        restarts: String,
    }

    let rows: Vec<StatusRow> = status
        .values()
        .map(|s| StatusRow {
            name: truncate(&s.name, 20),
            health: format_health_colored(s.status),
            state: s.state.to_string(),
            pid: s
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
            uptime: format_duration(&Duration::from_secs(s.uptime_secs)),
            restarts: s.restart_count.to_string(),
        })
        .collect();

    print_table(Table::new(rows));
}

/// Print approval requests waiting on an approver
pub fn print_pending_approvals(requests: &[OperationRequest]) {
    #[derive(Tabled)]
    struct PendingRow {
        #[tabled(rename = "Approval ID")]
        id: String,
        #[tabled(rename = "Operation")]
        operation: String,
        #[tabled(rename = "Server")]
        server: String,
        #[tabled(rename = "Risk")]
        risk: String,
        #[tabled(rename = "Requested by")]
        requester: String,
    }

    let rows: Vec<PendingRow> = requests
        .iter()
        .map(|r| PendingRow {
            id: r.id.clone(),
            operation: r.operation_type.clone(),
            server: r
                .parameters
                .get(SERVER_PARAM)
                .cloned()
                .unwrap_or_else(|| "-".to_string()),
            risk: format_risk_colored(r.risk_level),
            requester: r.requester.clone(),
        })
        .collect();

    println!(
        "{} {} new approval request(s) pending",
        "!".yellow().bold(),
        requests.len()
    );
    print_table(Table::new(rows));
}

/// Print host metrics followed by insights
pub fn print_insights(metrics: &ResourceMetrics, insights: &[Insight]) {
    println!("\n{}", "Host Resources".bold().underline());
    println!("  {:<10} {:.1}%", "CPU:".bold(), metrics.cpu_percent);
    println!("  {:<10} {:.1}%", "Memory:".bold(), metrics.memory_percent);
    println!("  {:<10} {:.1}%", "Disk:".bold(), metrics.disk_percent);

    println!("\n{}", "Insights".bold().underline());
    if insights.is_empty() {
        println!("  {}", "Nothing to report".green());
    }
    for insight in insights {
        let marker = match insight.insight_type {
            InsightType::Error => "✗".red().bold(),
            InsightType::Warning => "!".yellow().bold(),
            InsightType::Info => "ℹ".blue().bold(),
        };
        let remediation = match insight.remediation {
            Remediation::AutoFix => insight.remediation.to_string().green(),
            Remediation::AwaitingApproval => insight.remediation.to_string().yellow(),
            Remediation::Blocked => insight.remediation.to_string().red(),
            Remediation::Manual => insight.remediation.to_string().dimmed(),
        };
        println!("  {} {} [{}]", marker, insight.message, remediation);
    }
    println!();
}

fn print_table(mut table: Table) {
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));
    println!("\n{}\n", table);
}

fn format_risk_colored(risk: RiskLevel) -> String {
    match risk {
        RiskLevel::Safe => risk.to_string().green().to_string(),
        RiskLevel::Low => risk.to_string().cyan().to_string(),
        RiskLevel::High => risk.to_string().yellow().to_string(),
        RiskLevel::Critical => risk.to_string().red().bold().to_string(),
    }
}

fn format_health_colored(status: HealthStatus) -> String {
    match status {
        HealthStatus::Healthy => status.to_string().green().to_string(),
        HealthStatus::Offline => status.to_string().red().bold().to_string(),
        HealthStatus::Unknown => status.to_string().bright_black().to_string(),
    }
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_string()
}

/// Format a duration in human-readable format
fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        let secs = secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else if secs < 86400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    } else {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    }
}

/// Truncate a string to a maximum length
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
