use procfs::ProcError;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::error::{JobError, Result};
use crate::models::stats::BYTES_PER_MB;
use crate::models::{unix_timestamp, JobStatus, ProcessSnapshot, ResourceSample};

/// Samples one process. CPU usage is measured between consecutive calls to
/// [`StatsCollector::collect`], so a collector lives as long as its poller.
pub struct StatsCollector {
    system: System,
    pid: u32,
}

impl StatsCollector {
    pub fn new(pid: u32) -> Self {
        let mut collector = Self {
            system: System::new(),
            pid,
        };
        // prime the CPU counters so the first collect reports a real delta
        collector.refresh();
        collector
    }

    fn refresh(&mut self) {
        let pid = Pid::from_u32(self.pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );
    }

    /// `JobError::ProcessGone` once the process has disappeared.
    pub fn collect(&mut self) -> Result<(ResourceSample, ProcessSnapshot)> {
        self.refresh();

        let process = self
            .system
            .process(Pid::from_u32(self.pid))
            .ok_or(JobError::ProcessGone(self.pid))?;

        let status = JobStatus::from(process.status());
        let cpu_percent = process.cpu_usage();
        let rss_mb = process.memory() as f64 / BYTES_PER_MB;
        let timestamp = unix_timestamp();

        let sample = ResourceSample {
            pid: self.pid,
            cpu_percent,
            ram_mb: rss_mb,
            status,
            timestamp,
        };

        let mut snapshot = ProcessSnapshot {
            pid: self.pid,
            name: process.name().to_string_lossy().into_owned(),
            status,
            cpu_percent,
            rss_mb,
            vms_mb: process.virtual_memory() as f64 / BYTES_PER_MB,
            num_threads: None,
            create_time: process.start_time(),
            io_read_bytes: None,
            io_write_bytes: None,
            unavailable: Vec::new(),
            timestamp,
        };

        match read_thread_count(self.pid) {
            Ok(threads) => snapshot.num_threads = threads,
            Err(e) => degrade(&mut snapshot, e),
        }
        match read_io_counters(self.pid) {
            Ok(Some((read, write))) => {
                snapshot.io_read_bytes = Some(read);
                snapshot.io_write_bytes = Some(write);
            }
            Ok(None) => {}
            Err(e) => degrade(&mut snapshot, e),
        }

        Ok((sample, snapshot))
    }
}

fn degrade(snapshot: &mut ProcessSnapshot, err: JobError) {
    match &err {
        JobError::AccessDenied { metric, .. } => {
            log::debug!("PID {}: {}", snapshot.pid, err);
            snapshot.unavailable.push(metric.to_string());
        }
        other => log::trace!("PID {}: optional metric missing: {}", snapshot.pid, other),
    }
}

fn read_thread_count(pid: u32) -> Result<Option<u64>> {
    let stat = procfs::process::Process::new(pid as i32)
        .and_then(|p| p.stat())
        .map(Some)
        .or_else(|e| optional_metric(pid, "num_threads", e))?;
    Ok(stat.map(|s| s.num_threads.max(0) as u64))
}

fn read_io_counters(pid: u32) -> Result<Option<(u64, u64)>> {
    let io = procfs::process::Process::new(pid as i32)
        .and_then(|p| p.io())
        .map(Some)
        .or_else(|e| optional_metric(pid, "io", e))?;
    Ok(io.map(|io| (io.read_bytes, io.write_bytes)))
}

/// Permission errors surface as `AccessDenied`; anything else means the
/// counter simply is not there (process gone, kernel without the file).
fn optional_metric<T>(pid: u32, metric: &'static str, err: ProcError) -> Result<Option<T>> {
    match err {
        ProcError::PermissionDenied(_) => Err(JobError::AccessDenied { pid, metric }),
        _ => Ok(None),
    }
}
