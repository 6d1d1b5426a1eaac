use std::sync::Mutex;

use sysinfo::{CpuExt, DiskExt, System, SystemExt};

use crate::{Result, edge::backend::{ResourceProbe, ResourceUsage}};

/// Samples the host through sysinfo.
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

fn percent(
    used: u64,
    total: u64,
) -> f64 {
    if total == 0 { 0.0 } else { used as f64 * 100.0 / total as f64 }
}

impl ResourceProbe for SysinfoProbe {
    fn usage(&self) -> Result<ResourceUsage> {
        let mut sys = self.system.lock().unwrap();

        // cpu usage is a delta between two refreshes
        sys.refresh_cpu();
        std::thread::sleep(System::MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu();
        sys.refresh_memory();
        sys.refresh_disks_list();
        sys.refresh_disks();

        let (disk_total, disk_free) = sys.disks().iter().fold((0, 0), |(total, free), d| (total + d.total_space(), free + d.available_space()));

        Ok(ResourceUsage {
            cpu: sys.global_cpu_info().cpu_usage() as f64,
            mem: percent(sys.used_memory(), sys.total_memory()),
            disk: percent(disk_total.saturating_sub(disk_free), disk_total),
        })
    }
}

#[cfg(test)]
mod test {
    use super::{SysinfoProbe, percent};
    use crate::edge::backend::ResourceProbe;

    #[test]
    fn test_percent() {
        assert_eq!(percent(1, 4), 25.0);
        assert_eq!(percent(5, 0), 0.0);
    }

    #[test]
    fn test_host_usage_in_range() {
        let usage = SysinfoProbe::new().usage().unwrap();
        for value in [usage.cpu, usage.mem, usage.disk] {
            assert!((0.0..=100.0 + f64::EPSILON).contains(&value), "{}", value);
        }
    }
}
