use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::runtime::Handle;

use crate::error::{JobError, Result};
use crate::models::{Job, JobStatus, ResourceSample};
use crate::services::job_logger::{JobLogger, Stream};
use crate::services::job_monitor::JobMonitor;
use crate::services::metrics_history::MetricsHistory;
use crate::services::process_registry::{ProcessRegistry, STOP_GRACE_PERIOD};
use crate::services::system_reader::SystemReader;
use crate::services::validators::{generate_job_id, validate_command, validate_job_id};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub monitor_interval: Duration,
    /// Zero disables the background system sampler
    pub system_sample_interval: Duration,
    pub history_size: usize,
    pub log_dir: PathBuf,
    pub stop_grace_period: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(1),
            system_sample_interval: Duration::from_secs(5),
            history_size: 1000,
            log_dir: PathBuf::from("./logs"),
            stop_grace_period: STOP_GRACE_PERIOD,
        }
    }
}

/// A job together with its latest live sample
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
    pub metrics: Option<ResourceSample>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoppedJob {
    pub job_id: String,
    pub pid: u32,
    pub command: Vec<String>,
    pub exit_code: Option<i32>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Job table plus the create/stop/restart flows across registry, monitor,
/// history and job logs.
pub struct Orchestrator {
    runtime: Handle,
    registry: ProcessRegistry,
    monitor: JobMonitor,
    history: Arc<MetricsHistory>,
    logger: Arc<JobLogger>,
    system: SystemReader,
    jobs: Mutex<HashMap<String, Job>>,
    sample_interval: Duration,
    sampler_running: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(runtime: Handle, config: OrchestratorConfig) -> std::io::Result<Self> {
        let history = Arc::new(MetricsHistory::new(config.history_size));
        let logger = Arc::new(JobLogger::new(&config.log_dir)?);

        Ok(Self {
            registry: ProcessRegistry::with_grace_period(runtime.clone(), config.stop_grace_period),
            monitor: JobMonitor::new(runtime.clone(), config.monitor_interval, history.clone()),
            runtime,
            history,
            logger,
            system: SystemReader::new(),
            jobs: Mutex::new(HashMap::new()),
            sample_interval: config.system_sample_interval,
            sampler_running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn monitor(&self) -> &JobMonitor {
        &self.monitor
    }

    pub fn history(&self) -> &MetricsHistory {
        &self.history
    }

    pub fn logger(&self) -> &JobLogger {
        &self.logger
    }

    pub fn system(&self) -> &SystemReader {
        &self.system
    }

    pub fn job_count(&self) -> usize {
        lock(&self.jobs).len()
    }

    pub async fn create_job(&self, command: Vec<String>, job_id: Option<String>) -> Result<JobView> {
        validate_command(&command)?;
        let job_id = job_id.unwrap_or_else(generate_job_id);
        validate_job_id(&job_id)?;

        if lock(&self.jobs).contains_key(&job_id) {
            return Err(JobError::JobExists(job_id));
        }

        let pid = match self.registry.start(&command) {
            Ok(pid) => pid,
            Err(e) => {
                self.logger.record_error(&job_id, &e.to_string());
                return Err(e);
            }
        };

        let job = Job {
            job_id: job_id.clone(),
            pid,
            command: command.clone(),
            status: JobStatus::Running,
            created_at: crate::models::unix_timestamp(),
        };

        let inserted = {
            let mut jobs = lock(&self.jobs);
            if jobs.contains_key(&job_id) {
                false
            } else {
                jobs.insert(job_id.clone(), job.clone());
                true
            }
        };
        if !inserted {
            // another request claimed the id while we were spawning
            if let Err(e) = self.registry.stop(pid).await {
                log::warn!("Failed to stop duplicate PID {}: {}", pid, e);
            }
            return Err(JobError::JobExists(job_id));
        }

        self.monitor.start_monitoring(pid);
        self.logger.record_start(&job_id, &command, pid);
        self.forward_output(&job_id, pid).await;

        log::info!("Job {} started with PID {}", job_id, pid);
        Ok(JobView { job, metrics: None })
    }

    async fn forward_output(&self, job_id: &str, pid: u32) {
        match self.registry.take_output(pid).await {
            Ok((stdout, stderr)) => {
                if let Some(stdout) = stdout {
                    self.spawn_forwarder(job_id, Stream::Stdout, stdout);
                }
                if let Some(stderr) = stderr {
                    self.spawn_forwarder(job_id, Stream::Stderr, stderr);
                }
            }
            Err(e) => log::warn!("Job {}: output not captured: {}", job_id, e),
        }
    }

    /// Copies one output stream into the job log until EOF. Bytes that are
    /// not UTF-8 are replaced, never treated as the end of the stream.
    fn spawn_forwarder<R>(&self, job_id: &str, stream: Stream, reader: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let logger = self.logger.clone();
        let job_id = job_id.to_string();
        self.runtime.spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        logger.record_output(&job_id, stream, line.trim_end_matches(['\n', '\r']));
                    }
                    Err(e) => {
                        logger.record_error(&job_id, &format!("reading {:?} failed: {}", stream, e));
                        break;
                    }
                }
            }
            logger.close(&job_id);
        });
    }

    pub async fn stop_job(&self, job_id: &str) -> Result<StoppedJob> {
        let job = lock(&self.jobs)
            .get(job_id)
            .cloned()
            .ok_or_else(|| JobError::job_not_found(job_id))?;

        // torn down while the pid is still ours, before it can be recycled
        self.monitor.stop_monitoring(job.pid);
        self.history.purge_process(job.pid);

        let exit_code = match self.registry.terminate(job.pid).await {
            Ok(code) => code,
            Err(e) => {
                self.logger.record_error(job_id, &e.to_string());
                self.monitor.start_monitoring(job.pid);
                return Err(e);
            }
        };

        let already_ended = lock(&self.jobs)
            .remove(job_id)
            .is_some_and(|stored| stored.status == JobStatus::Dead);
        if !already_ended {
            self.logger.record_end(job_id, job.pid, exit_code);
        }
        self.logger.close(job_id);

        log::info!("Job {} stopped (PID {})", job_id, job.pid);
        Ok(StoppedJob {
            job_id: job.job_id,
            pid: job.pid,
            command: job.command,
            exit_code,
        })
    }

    /// Stops the job and launches its command again under the same id.
    pub async fn restart_job(&self, job_id: &str) -> Result<JobView> {
        let stopped = self.stop_job(job_id).await?;
        self.create_job(stopped.command, Some(stopped.job_id)).await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<JobView> {
        let job = lock(&self.jobs)
            .get(job_id)
            .cloned()
            .ok_or_else(|| JobError::job_not_found(job_id))?;
        Ok(self.view(job).await)
    }

    /// All jobs, oldest first.
    pub async fn list_jobs(&self) -> Vec<JobView> {
        let mut jobs: Vec<Job> = lock(&self.jobs).values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.total_cmp(&b.created_at));

        let mut views = Vec::with_capacity(jobs.len());
        for job in jobs {
            views.push(self.view(job).await);
        }
        views
    }

    async fn view(&self, mut job: Job) -> JobView {
        let metrics = self.monitor.get_stats(job.pid);
        match &metrics {
            Some(sample) => job.status = sample.status,
            None => self.refresh_exit(&mut job).await,
        }
        JobView { job, metrics }
    }

    /// Notices a job whose process exited on its own and records the end once.
    async fn refresh_exit(&self, job: &mut Job) {
        if job.status != JobStatus::Running {
            return;
        }
        let Ok(handle) = self.registry.get(job.pid) else {
            return;
        };
        if let Some(exit_code) = handle.try_exit_code().await {
            job.status = JobStatus::Dead;
            let first = lock(&self.jobs)
                .get_mut(&job.job_id)
                .filter(|stored| stored.status == JobStatus::Running)
                .map(|stored| stored.status = JobStatus::Dead)
                .is_some();
            if first {
                self.logger.record_end(&job.job_id, job.pid, exit_code);
            }
        }
    }

    /// Starts the periodic system sampler feeding the history store.
    pub fn start_background(&self) {
        if self.sample_interval.is_zero() || self.sampler_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let running = self.sampler_running.clone();
        let history = self.history.clone();
        let reader = self.system;
        let interval = self.sample_interval;
        self.runtime.spawn(async move {
            while running.load(Ordering::SeqCst) {
                history.record_system(reader.snapshot_async().await);
                tokio::time::sleep(interval).await;
            }
            log::debug!("System sampler stopped");
        });
        log::info!("System sampler running every {:?}", interval);
    }

    pub fn shutdown(&self) {
        self.sampler_running.store(false, Ordering::SeqCst);
        self.monitor.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn orchestrator(dir: &TempDir) -> Orchestrator {
        let config = OrchestratorConfig {
            monitor_interval: Duration::from_millis(200),
            system_sample_interval: Duration::from_millis(300),
            history_size: 50,
            log_dir: dir.path().to_path_buf(),
            stop_grace_period: Duration::from_secs(2),
        };
        Orchestrator::new(Handle::current(), config).unwrap()
    }

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_create_and_stop_job() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);

        let view = orch
            .create_job(cmd(&["sleep", "30"]), Some("sleepy".to_string()))
            .await
            .unwrap();
        assert_eq!(view.job.status, JobStatus::Running);
        let pid = view.job.pid;
        assert!(orch.monitor().is_monitoring(pid));

        tokio::time::sleep(Duration::from_millis(500)).await;
        let view = orch.get_job("sleepy").await.unwrap();
        assert!(view.metrics.is_some());
        assert_eq!(orch.list_jobs().await.len(), 1);

        let stopped = orch.stop_job("sleepy").await.unwrap();
        assert_eq!(stopped.pid, pid);
        assert!(orch.monitor().get_stats(pid).is_none());
        assert!(matches!(orch.registry().get(pid), Err(JobError::NotFound(_))));
        assert!(matches!(orch.get_job("sleepy").await, Err(JobError::NotFound(_))));
        assert!(matches!(orch.stop_job("sleepy").await, Err(JobError::NotFound(_))));

        let lines = orch.logger().read_tail("sleepy", 10).unwrap();
        assert!(lines.first().unwrap().contains("Job started"));
        assert!(lines.last().unwrap().contains("Job finished"));
    }

    #[tokio::test]
    async fn test_duplicate_job_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        orch.create_job(cmd(&["sleep", "30"]), Some("dup".to_string()))
            .await
            .unwrap();

        let second = orch
            .create_job(cmd(&["sleep", "30"]), Some("dup".to_string()))
            .await;
        assert!(matches!(second, Err(JobError::JobExists(_))));
        assert_eq!(orch.registry().list().len(), 1);

        orch.stop_job("dup").await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);

        let denied = orch.create_job(cmd(&["rm", "-rf", "/tmp/nothing"]), None).await;
        assert!(matches!(denied, Err(JobError::InvalidCommand(_))));

        let bad_id = orch.create_job(cmd(&["sleep", "1"]), Some("x".to_string())).await;
        assert!(matches!(bad_id, Err(JobError::InvalidJobId(_))));
        assert_eq!(orch.job_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_output_is_forwarded_to_job_log() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        orch.create_job(
            cmd(&["sh", "-c", "echo out-line; echo err-line >&2"]),
            Some("chatty".to_string()),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        let lines = orch.logger().read_tail("chatty", 10).unwrap();
        assert!(lines.iter().any(|l| l.ends_with("INFO - stdout: out-line")));
        assert!(lines.iter().any(|l| l.ends_with("WARNING - stderr: err-line")));

        // the process already exited, the view notices
        let view = orch.get_job("chatty").await.unwrap();
        assert_ne!(view.job.status, JobStatus::Running);
        orch.stop_job("chatty").await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_restart_keeps_job_id() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let first = orch
            .create_job(cmd(&["sleep", "30"]), Some("again".to_string()))
            .await
            .unwrap();

        let second = orch.restart_job("again").await.unwrap();
        assert_eq!(second.job.job_id, "again");
        assert_ne!(second.job.pid, first.job.pid);
        assert_eq!(orch.job_count(), 1);

        orch.stop_job("again").await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_non_utf8_output_does_not_break_the_pipe() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        orch.create_job(
            cmd(&["sh", "-c", "printf 'bad\\377\\n'; sleep 0.3; echo after; sleep 30"]),
            Some("binary".to_string()),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(1200)).await;
        let lines = orch.logger().read_tail("binary", 10).unwrap();
        assert!(lines.iter().any(|l| l.ends_with("stdout: bad\u{FFFD}")));
        assert!(lines.iter().any(|l| l.ends_with("stdout: after")));

        let view = orch.get_job("binary").await.unwrap();
        assert_eq!(view.job.status, JobStatus::Running);
        orch.stop_job("binary").await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_natural_exit_is_recorded_once() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        orch.create_job(cmd(&["sh", "-c", "exit 0"]), Some("brief".to_string()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(800)).await;
        let view = orch.get_job("brief").await.unwrap();
        assert_eq!(view.job.status, JobStatus::Dead);

        let stopped = orch.stop_job("brief").await.unwrap();
        assert_eq!(stopped.exit_code, Some(0));

        let lines = orch.logger().read_tail("brief", 20).unwrap();
        let ends = lines.iter().filter(|l| l.contains("Job finished")).count();
        assert_eq!(ends, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_releases_log_sink() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        for id in ["first-job", "second-job"] {
            orch.create_job(cmd(&["sleep", "30"]), Some(id.to_string()))
                .await
                .unwrap();
        }
        assert_eq!(orch.logger().open_sinks(), 2);

        orch.stop_job("first-job").await.unwrap();
        orch.stop_job("second-job").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(orch.logger().open_sinks(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_leaves_a_newer_poller_for_the_pid_alone() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let view = orch
            .create_job(cmd(&["sleep", "30"]), Some("recycled".to_string()))
            .await
            .unwrap();
        let pid = view.job.pid;
        tokio::time::sleep(Duration::from_millis(400)).await;

        orch.stop_job("recycled").await.unwrap();
        assert!(!orch.monitor().is_monitoring(pid));
        assert!(orch.history().query_process(pid, Duration::MAX).is_empty());

        // a job that reuses the pid right after the stop keeps its poller
        assert!(orch.monitor().start_monitoring(pid));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_background_sampler_records_history() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        orch.start_background();
        tokio::time::sleep(Duration::from_millis(900)).await;
        orch.shutdown();

        assert!(!orch.history().query_system(Duration::MAX).is_empty());
    }
}
