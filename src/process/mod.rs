// Process module - Per-server lifecycle and host sampling

pub mod handle;
pub mod monitor;
pub mod spawner;
mod types;

pub use handle::ProcessHandle;
pub use monitor::HostMonitor;
pub use spawner::{spawn_process, SpawnedProcess};
pub use types::{HealthSnapshot, HealthStatus, ProcessState};
