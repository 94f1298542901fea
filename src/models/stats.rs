use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::models::JobStatus;

pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Seconds since the Unix epoch, with sub-second precision
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Latest live sample of a monitored process
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResourceSample {
    pub pid: u32,
    /// CPU usage since the previous sample (percent of one core)
    pub cpu_percent: f32,
    /// Resident memory in MB
    pub ram_mb: f64,
    pub status: JobStatus,
    pub timestamp: f64,
}

/// Host-wide counters at one point in time
#[derive(Debug, Clone, Serialize)]
pub struct SystemSnapshot {
    pub cpu_percent: f32,
    pub cpu_count: usize,
    pub per_cpu_percent: Vec<f32>,

    pub ram_total_mb: f64,
    pub ram_used_mb: f64,
    pub ram_available_mb: f64,
    pub ram_percent: f64,

    /// Root volume, omitted when no disk is mounted at `/`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_total_gb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_used_gb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_free_gb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_percent: Option<f64>,

    /// Cumulative counters summed over all interfaces
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_bytes_sent: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_bytes_recv: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_packets_sent: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_packets_recv: Option<u64>,

    pub timestamp: f64,
}

/// Detailed per-process sample kept in history
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub name: String,
    pub status: JobStatus,
    pub cpu_percent: f32,
    pub rss_mb: f64,
    pub vms_mb: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_threads: Option<u64>,
    /// Unix timestamp (seconds) of process creation
    pub create_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub io_read_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub io_write_bytes: Option<u64>,
    /// Metrics the OS refused to hand out (permission denied)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unavailable: Vec<String>,
    pub timestamp: f64,
}

/// Anything stored in a history buffer
pub trait Timestamped {
    fn timestamp(&self) -> f64;
}

impl Timestamped for SystemSnapshot {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

impl Timestamped for ProcessSnapshot {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}
