use crate::config::LaunchSpec;
use crate::error::{Result, StewardError};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Metadata returned when spawning a process
#[derive(Debug)]
pub struct SpawnedProcess {
    /// The child process handle
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,
}

/// Spawn a server from its launch spec
///
/// The spec's environment overlay is merged into the inherited environment.
/// Stdout and stderr go to the spec's `log_file` when one is set and are
/// discarded otherwise. The child is killed if its handle is dropped.
pub fn spawn_process(spec: &LaunchSpec) -> Result<SpawnedProcess> {
    let mut command = Command::new(&spec.command);

    command.args(&spec.args);
    command.envs(&spec.env);

    if let Some(ref cwd) = spec.cwd {
        command.current_dir(cwd);
    }

    command.stdin(Stdio::null());
    match spec.log_file {
        Some(ref path) => {
            let (stdout, stderr) = open_log(spec, path)?;
            command.stdout(Stdio::from(stdout));
            command.stderr(Stdio::from(stderr));
        }
        None => {
            command.stdout(Stdio::null());
            command.stderr(Stdio::null());
        }
    }

    command.kill_on_drop(true);

    let child = command
        .spawn()
        .map_err(|e| StewardError::SpawnError(spec.name.clone(), e.to_string()))?;

    let pid = child.id().ok_or_else(|| {
        StewardError::SpawnError(spec.name.clone(), "no PID assigned".to_string())
    })?;

    Ok(SpawnedProcess { child, pid })
}

/// Open the log file once for stdout and once (cloned) for stderr
fn open_log(spec: &LaunchSpec, path: &Path) -> Result<(File, File)> {
    let log_error = |e: std::io::Error| {
        StewardError::SpawnError(
            spec.name.clone(),
            format!("cannot open log file {}: {}", path.display(), e),
        )
    };

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(log_error)?;
    let stderr = file.try_clone().map_err(log_error)?;
    Ok((file, stderr))
}
