use std::path::Path;

use sysinfo::{Disks, Networks, System, MINIMUM_CPU_UPDATE_INTERVAL};

use crate::models::stats::{BYTES_PER_GB, BYTES_PER_MB};
use crate::models::{unix_timestamp, SystemSnapshot};

/// Point-in-time host metrics. Holds no state between calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemReader;

impl SystemReader {
    pub fn new() -> Self {
        Self
    }

    /// Blocks for one CPU sampling interval.
    pub fn snapshot(&self) -> SystemSnapshot {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let ram_total = sys.total_memory();
        let ram_used = sys.used_memory();
        let ram_percent = if ram_total > 0 {
            ram_used as f64 / ram_total as f64 * 100.0
        } else {
            0.0
        };

        let disk = root_disk_usage();
        let net = network_totals();

        SystemSnapshot {
            cpu_percent: sys.global_cpu_usage(),
            cpu_count: sys.cpus().len(),
            per_cpu_percent: sys.cpus().iter().map(|cpu| cpu.cpu_usage()).collect(),
            ram_total_mb: ram_total as f64 / BYTES_PER_MB,
            ram_used_mb: ram_used as f64 / BYTES_PER_MB,
            ram_available_mb: sys.available_memory() as f64 / BYTES_PER_MB,
            ram_percent,
            disk_total_gb: disk.map(|d| d.total as f64 / BYTES_PER_GB),
            disk_used_gb: disk.map(|d| d.used() as f64 / BYTES_PER_GB),
            disk_free_gb: disk.map(|d| d.available as f64 / BYTES_PER_GB),
            disk_percent: disk.and_then(|d| d.percent()),
            net_bytes_sent: net.map(|n| n.bytes_sent),
            net_bytes_recv: net.map(|n| n.bytes_recv),
            net_packets_sent: net.map(|n| n.packets_sent),
            net_packets_recv: net.map(|n| n.packets_recv),
            timestamp: unix_timestamp(),
        }
    }

    /// Runs [`SystemReader::snapshot`] on the blocking pool.
    pub async fn snapshot_async(&self) -> SystemSnapshot {
        let reader = *self;
        match tokio::task::spawn_blocking(move || reader.snapshot()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("System snapshot task failed ({}), sampling inline", e);
                self.snapshot()
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DiskUsage {
    total: u64,
    available: u64,
}

impl DiskUsage {
    fn used(&self) -> u64 {
        self.total.saturating_sub(self.available)
    }

    fn percent(&self) -> Option<f64> {
        (self.total > 0).then(|| self.used() as f64 / self.total as f64 * 100.0)
    }
}

fn root_disk_usage() -> Option<DiskUsage> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .find(|disk| disk.mount_point() == Path::new("/"))
        .map(|disk| DiskUsage {
            total: disk.total_space(),
            available: disk.available_space(),
        })
}

#[derive(Debug, Clone, Copy, Default)]
struct NetworkTotals {
    bytes_sent: u64,
    bytes_recv: u64,
    packets_sent: u64,
    packets_recv: u64,
}

fn network_totals() -> Option<NetworkTotals> {
    let networks = Networks::new_with_refreshed_list();
    if networks.list().is_empty() {
        return None;
    }

    let totals = networks
        .list()
        .values()
        .fold(NetworkTotals::default(), |acc, data| NetworkTotals {
            bytes_sent: acc.bytes_sent + data.total_transmitted(),
            bytes_recv: acc.bytes_recv + data.total_received(),
            packets_sent: acc.packets_sent + data.total_packets_transmitted(),
            packets_recv: acc.packets_recv + data.total_packets_received(),
        });
    Some(totals)
}
