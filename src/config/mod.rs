use crate::error::{Result, StewardError};
use crate::security::RiskPolicy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Launch specification for one supervised server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Server name (unique, stable across restarts)
    pub name: String,

    /// Executable to run (absolute path or resolved through PATH)
    pub command: String,

    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overlay, merged into the supervisor's own environment
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for the process
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Whether an offline server should be remediated by the health-check loop
    #[serde(default = "default_auto_restart")]
    pub auto_restart: bool,

    /// Disabled servers are never registered
    #[serde(default)]
    pub disabled: bool,

    /// Grace period between the termination signal and a forced kill (in seconds)
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// File receiving the server's stdout and stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_auto_restart() -> bool {
    true
}

fn default_stop_timeout() -> u64 {
    10
}

impl LaunchSpec {
    /// Minimal spec with defaults for everything but name and command
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            auto_restart: default_auto_restart(),
            disabled: false,
            stop_timeout_secs: default_stop_timeout(),
            log_file: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Validate a single launch spec
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(StewardError::MissingConfigField("name".to_string()));
        }

        if self.command.trim().is_empty() {
            return Err(StewardError::MissingConfigField(format!(
                "command (server '{}')",
                self.name
            )));
        }

        if self.stop_timeout_secs == 0 {
            return Err(StewardError::ConfigValidationError(format!(
                "stop_timeout_secs for '{}' must be at least 1",
                self.name
            )));
        }

        if let Some(ref cwd) = self.cwd {
            if !cwd.is_dir() {
                return Err(StewardError::ConfigValidationError(format!(
                    "Working directory for '{}' is not a directory: {}",
                    self.name,
                    cwd.display()
                )));
            }
        }

        Ok(())
    }

    /// Graceful stop grace period as Duration
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    fn expand_env_vars(&mut self) {
        self.command = expand_env_in_string(&self.command);

        if let Some(ref cwd) = self.cwd {
            self.cwd = Some(PathBuf::from(expand_env_in_string(&cwd.to_string_lossy())));
        }

        if let Some(ref log_file) = self.log_file {
            self.log_file = Some(PathBuf::from(expand_env_in_string(
                &log_file.to_string_lossy(),
            )));
        }

        self.args = self
            .args
            .iter()
            .map(|arg| expand_env_in_string(arg))
            .collect();

        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_in_string(v)))
            .collect();
    }
}

/// Timing knobs for the fleet supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// Sleep between health-check cycles (in seconds)
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Liveness grace wait after spawning (in milliseconds)
    #[serde(default = "default_startup_grace")]
    pub startup_grace_ms: u64,

    /// Settle delay between stop and start during a restart (in milliseconds)
    #[serde(default = "default_restart_settle")]
    pub restart_settle_ms: u64,

    /// Backoff after a failed health-check cycle (in seconds)
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,
}

fn default_check_interval() -> u64 {
    30
}

fn default_startup_grace() -> u64 {
    500
}

fn default_restart_settle() -> u64 {
    1000
}

fn default_error_backoff() -> u64 {
    5
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            startup_grace_ms: default_startup_grace(),
            restart_settle_ms: default_restart_settle(),
            error_backoff_secs: default_error_backoff(),
        }
    }
}

impl SupervisorSettings {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.check_interval_secs == 0 {
            return Err(StewardError::ConfigValidationError(
                "check_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Complete fleet configuration: supervisor timing, risk policy and servers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub supervisor: SupervisorSettings,

    #[serde(default)]
    pub policy: RiskPolicy,

    #[serde(default)]
    pub servers: Vec<LaunchSpec>,
}

impl FleetConfig {
    /// Load a fleet configuration from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<FleetConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| StewardError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut config = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(StewardError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        for server in &mut config.servers {
            server.expand_env_vars();
        }

        config.validate()?;
        Ok(config)
    }

    fn parse_toml(contents: &str) -> Result<FleetConfig> {
        toml::from_str(contents)
            .map_err(|e| StewardError::InvalidConfig(format!("Failed to parse TOML: {}", e)))
    }

    fn parse_json(contents: &str) -> Result<FleetConfig> {
        serde_json::from_str(contents)
            .map_err(|e| StewardError::InvalidConfig(format!("Failed to parse JSON: {}", e)))
    }

    /// Validate supervisor settings and every server; names must be unique
    pub fn validate(&self) -> Result<()> {
        self.supervisor.validate()?;

        let mut seen = HashSet::new();
        for server in &self.servers {
            server.validate()?;
            if !seen.insert(server.name.as_str()) {
                return Err(StewardError::ConfigValidationError(format!(
                    "Duplicate server name: {}",
                    server.name
                )));
            }
        }

        Ok(())
    }

    /// Servers that will actually be registered
    pub fn enabled_servers(&self) -> impl Iterator<Item = &LaunchSpec> {
        self.servers.iter().filter(|s| !s.disabled)
    }
}

/// Expand `$VAR` and `${VAR}` references from the current environment.
///
/// Each reference is resolved by its exact name (the longest identifier after
/// `$`). References to unset variables are left as written.
fn expand_env_in_string(s: &str) -> String {
    expand_with(s, |name| std::env::var(name).ok())
}

fn expand_with<F>(s: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if !s.contains('$') {
        return s.to_string();
    }

    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) if is_env_name(&braced[..end]) => (&braced[..end], end + 2),
                _ => ("", 0),
            }
        } else {
            let end = after
                .char_indices()
                .find(|&(i, c)| !(c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit())))
                .map(|(i, _)| i)
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        if consumed == 0 {
            result.push('$');
        } else {
            match lookup(name) {
                Some(value) => result.push_str(&value),
                None => result.push_str(&rest[pos..pos + 1 + consumed]),
            }
        }
        rest = &rest[pos + 1 + consumed..];
    }

    result.push_str(rest);
    result
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
