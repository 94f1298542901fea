use prometheus::{
    register_gauge_vec_with_registry, register_gauge_with_registry, Encoder, Gauge, GaugeVec,
    Opts, Registry, TextEncoder,
};
use lazy_static::lazy_static;
use std::sync::Arc;

use crate::models::SystemSnapshot;
use crate::services::JobView;

pub struct MetricsRegistry {
    registry: Registry,

    // per job
    pub job_up: GaugeVec,
    pub job_cpu_percent: GaugeVec,
    pub job_ram_mb: GaugeVec,
    pub job_created_timestamp: GaugeVec,
    pub job_last_sample_timestamp: GaugeVec,

    // host
    pub system_cpu_percent: Gauge,
    pub system_ram_used_mb: Gauge,
    pub system_ram_percent: Gauge,
    pub system_disk_percent: Gauge,
    pub system_net_bytes_sent: Gauge,
    pub system_net_bytes_recv: Gauge,
    pub monitored_processes: Gauge,
}

macro_rules! job_gauge {
    ($registry:expr, $name:expr, $help:expr) => {
        register_gauge_vec_with_registry!(Opts::new($name, $help), &["job_id", "pid"], $registry)
            .expect("job gauge registers once")
    };
}

macro_rules! host_gauge {
    ($registry:expr, $name:expr, $help:expr) => {
        register_gauge_with_registry!(Opts::new($name, $help), $registry)
            .expect("host gauge registers once")
    };
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let registry = Registry::new();

        Self {
            job_up: job_gauge!(registry, "job_up", "Job process is running (1) or not (0)"),
            job_cpu_percent: job_gauge!(registry, "job_cpu_percent", "Job CPU usage percentage"),
            job_ram_mb: job_gauge!(registry, "job_ram_mb", "Job resident memory in MB"),
            job_created_timestamp: job_gauge!(
                registry,
                "job_created_timestamp_seconds",
                "Unix timestamp when the job was started"
            ),
            job_last_sample_timestamp: job_gauge!(
                registry,
                "job_last_sample_timestamp_seconds",
                "Unix timestamp of the latest job sample"
            ),
            system_cpu_percent: host_gauge!(registry, "system_cpu_percent", "Host CPU usage"),
            system_ram_used_mb: host_gauge!(registry, "system_ram_used_mb", "Host used RAM in MB"),
            system_ram_percent: host_gauge!(registry, "system_ram_percent", "Host RAM usage"),
            system_disk_percent: host_gauge!(
                registry,
                "system_disk_percent",
                "Root volume usage percentage"
            ),
            system_net_bytes_sent: host_gauge!(
                registry,
                "system_net_bytes_sent",
                "Bytes sent over all interfaces"
            ),
            system_net_bytes_recv: host_gauge!(
                registry,
                "system_net_bytes_recv",
                "Bytes received over all interfaces"
            ),
            monitored_processes: host_gauge!(
                registry,
                "monitored_processes",
                "Processes with an active poller"
            ),
            registry,
        }
    }

    /// Replaces all job series, so stopped jobs disappear from the output.
    pub fn update_jobs(&self, jobs: &[JobView]) {
        self.job_up.reset();
        self.job_cpu_percent.reset();
        self.job_ram_mb.reset();
        self.job_created_timestamp.reset();
        self.job_last_sample_timestamp.reset();

        for view in jobs {
            let pid = view.job.pid.to_string();
            let labels = &[view.job.job_id.as_str(), pid.as_str()];

            let up = if view.job.status.is_terminal() { 0.0 } else { 1.0 };
            self.job_up.with_label_values(labels).set(up);
            self.job_created_timestamp
                .with_label_values(labels)
                .set(view.job.created_at);

            if let Some(sample) = &view.metrics {
                self.job_cpu_percent
                    .with_label_values(labels)
                    .set(sample.cpu_percent as f64);
                self.job_ram_mb.with_label_values(labels).set(sample.ram_mb);
                self.job_last_sample_timestamp
                    .with_label_values(labels)
                    .set(sample.timestamp);
            }
        }
    }

    pub fn update_system(&self, snapshot: &SystemSnapshot, monitored: usize) {
        self.system_cpu_percent.set(snapshot.cpu_percent as f64);
        self.system_ram_used_mb.set(snapshot.ram_used_mb);
        self.system_ram_percent.set(snapshot.ram_percent);
        if let Some(disk) = snapshot.disk_percent {
            self.system_disk_percent.set(disk);
        }
        if let Some(sent) = snapshot.net_bytes_sent {
            self.system_net_bytes_sent.set(sent as f64);
        }
        if let Some(recv) = snapshot.net_bytes_recv {
            self.system_net_bytes_recv.set(recv as f64);
        }
        self.monitored_processes.set(monitored as f64);
    }

    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    pub static ref METRICS: Arc<MetricsRegistry> = Arc::new(MetricsRegistry::new());
}
