//! Host resource sampling.
//!
//! CPU usage is the delta between two refreshes of the same [`System`], so
//! the sampler keeps one alive for the life of the process. The very first
//! sample after start-up reads 0 % CPU.

use std::path::Path;
use std::sync::Mutex;

use sysinfo::{Disks, Networks, System};

use farm_core::wire::{CpuStats, DiskStats, MemoryStats, NetworkStats};

const MB: f64 = 1024.0 * 1024.0;
const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// CPU and memory at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub cpu: CpuStats,
    pub memory: MemoryStats,
}

impl Snapshot {
    /// Whether either CPU or memory usage exceeds `threshold` percent.
    pub fn exceeds(&self, threshold: f64) -> bool {
        self.cpu.percent > threshold || self.memory.percent > threshold
    }
}

pub struct Sampler {
    system: Mutex<System>,
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler").finish_non_exhaustive()
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler {
    pub fn new() -> Self {
        let mut system = System::new_all();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut sys = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let total = sys.total_memory();
        let available = sys.available_memory();
        let used = total.saturating_sub(available);

        Snapshot {
            cpu: CpuStats {
                percent: round2(sys.global_cpu_info().cpu_usage() as f64),
                count: sys.cpus().len(),
            },
            memory: MemoryStats {
                total_mb: round2(total as f64 / MB),
                available_mb: round2(available as f64 / MB),
                used_mb: round2(used as f64 / MB),
                percent: percent(used, total),
            },
        }
    }
}

/// Usage of the filesystem mounted at `/`, if there is one.
pub fn disk_stats() -> Option<DiskStats> {
    let disks = Disks::new_with_refreshed_list();
    let root = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == Path::new("/"))?;

    let total = root.total_space();
    let free = root.available_space();
    let used = total.saturating_sub(free);
    Some(DiskStats {
        total_gb: round2(total as f64 / GB),
        used_gb: round2(used as f64 / GB),
        free_gb: round2(free as f64 / GB),
        percent: percent(used, total),
    })
}

/// Traffic counters summed over every interface.
pub fn network_stats() -> NetworkStats {
    let networks = Networks::new_with_refreshed_list();
    networks
        .iter()
        .fold(NetworkStats::default(), |mut acc, (_, data)| {
            acc.bytes_sent += data.total_transmitted();
            acc.bytes_recv += data.total_received();
            acc.packets_sent += data.total_packets_transmitted();
            acc.packets_recv += data.total_packets_received();
            acc
        })
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64 * 100.0)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
