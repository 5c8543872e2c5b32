use crate::insights::ResourceMetrics;
use sysinfo::{Disks, System, MINIMUM_CPU_UPDATE_INTERVAL};

/// Host-level resource sampler
pub struct HostMonitor {
    /// System information collector
    system: System,
    disks: Disks,
}

impl HostMonitor {
    /// Create a new host monitor
    pub fn new() -> Self {
        Self {
            system: System::new(),
            disks: Disks::new_with_refreshed_list(),
        }
    }

    /// Sample CPU, memory and disk usage as percentages.
    ///
    /// CPU usage is a delta between two refreshes, so this waits for the
    /// minimum interval sysinfo needs between them.
    pub async fn sample(&mut self) -> ResourceMetrics {
        self.system.refresh_cpu_usage();
        tokio::time::sleep(MINIMUM_CPU_UPDATE_INTERVAL).await;
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        self.disks.refresh_list();

        ResourceMetrics {
            cpu_percent: self.system.global_cpu_usage() as f64,
            memory_percent: percent(
                self.system.used_memory(),
                self.system.total_memory(),
            ),
            disk_percent: self.disk_usage_percent(),
        }
    }

    /// Combined usage across all mounted disks
    fn disk_usage_percent(&self) -> f64 {
        let (total, available) = self
            .disks
            .list()
            .iter()
            .fold((0u64, 0u64), |(total, available), disk| {
                (
                    total.saturating_add(disk.total_space()),
                    available.saturating_add(disk.available_space()),
                )
            });

        percent(total.saturating_sub(available), total)
    }
}

impl Default for HostMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(50, 200), 25.0);
        assert_eq!(percent(200, 200), 100.0);
    }

    #[tokio::test]
    async fn test_sample_is_within_bounds() {
        let mut monitor = HostMonitor::new();
        let metrics = monitor.sample().await;

        assert!(metrics.memory_percent > 0.0);
        assert!(metrics.memory_percent <= 100.0);
        assert!(metrics.cpu_percent >= 0.0);
        assert!((0.0..=100.0).contains(&metrics.disk_percent));
    }
}
