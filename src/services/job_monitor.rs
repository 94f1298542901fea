use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;

use crate::error::JobError;
use crate::models::ResourceSample;
use crate::services::metrics_history::MetricsHistory;
use crate::services::stats_collector::StatsCollector;

/// Cancellation handle of one poller. The supervisor never holds the task
/// itself, only this flag and the id that tells generations apart.
#[derive(Debug)]
struct PollerHandle {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct MonitorState {
    stats: HashMap<u32, ResourceSample>,
    pollers: HashMap<u32, PollerHandle>,
}

impl MonitorState {
    fn is_current(&self, pid: u32, id: u64) -> bool {
        self.pollers.get(&pid).is_some_and(|h| h.id == id)
    }
}

type SharedState = Arc<Mutex<MonitorState>>;

fn lock(state: &Mutex<MonitorState>) -> MutexGuard<'_, MonitorState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs one polling task per monitored pid and keeps the latest sample of
/// each. Stats map and poller table share a single lock, which is only ever
/// held for one map operation.
pub struct JobMonitor {
    runtime: Handle,
    interval: Duration,
    history: Arc<MetricsHistory>,
    state: SharedState,
    running: Arc<AtomicBool>,
    next_id: AtomicU64,
}

impl JobMonitor {
    pub fn new(runtime: Handle, interval: Duration, history: Arc<MetricsHistory>) -> Self {
        Self {
            runtime,
            interval,
            history,
            state: Arc::new(Mutex::new(MonitorState::default())),
            running: Arc::new(AtomicBool::new(true)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Starts a poller for `pid` unless one exists. Returns whether a new
    /// poller was started.
    pub fn start_monitoring(&self, pid: u32) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            log::warn!("Monitor is shut down, not monitoring PID {}", pid);
            return false;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        {
            let mut state = lock(&self.state);
            if state.pollers.contains_key(&pid) {
                return false;
            }
            state.pollers.insert(
                pid,
                PollerHandle {
                    id,
                    cancelled: cancelled.clone(),
                },
            );
        }

        let poller = Poller {
            pid,
            id,
            interval: self.interval,
            cancelled,
            running: self.running.clone(),
            state: self.state.clone(),
            history: self.history.clone(),
        };
        self.runtime.spawn(poller.run());

        log::info!("✓ Started monitoring PID {}", pid);
        true
    }

    /// Drops the stats entry and poller reference. An in-flight tick may still
    /// finish, but it can no longer write into the stats map.
    pub fn stop_monitoring(&self, pid: u32) -> bool {
        let mut state = lock(&self.state);
        state.stats.remove(&pid);
        match state.pollers.remove(&pid) {
            Some(handle) => {
                handle.cancelled.store(true, Ordering::SeqCst);
                log::info!("Stopped monitoring PID {}", pid);
                true
            }
            None => false,
        }
    }

    pub fn get_stats(&self, pid: u32) -> Option<ResourceSample> {
        lock(&self.state).stats.get(&pid).cloned()
    }

    pub fn get_all_stats(&self) -> HashMap<u32, ResourceSample> {
        lock(&self.state).stats.clone()
    }

    pub fn is_monitoring(&self, pid: u32) -> bool {
        lock(&self.state).pollers.contains_key(&pid)
    }

    pub fn monitored_count(&self) -> usize {
        lock(&self.state).pollers.len()
    }

    /// Tells every poller to stop at its next check. Does not wait for them.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in lock(&self.state).pollers.values() {
            handle.cancelled.store(true, Ordering::SeqCst);
        }
        log::info!("Monitor shutdown requested");
    }
}

struct Poller {
    pid: u32,
    id: u64,
    interval: Duration,
    cancelled: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    state: SharedState,
    history: Arc<MetricsHistory>,
}

impl Poller {
    fn should_stop(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || !self.running.load(Ordering::SeqCst)
    }

    async fn run(self) {
        let pid = self.pid;
        let Ok(mut collector) = tokio::task::spawn_blocking(move || StatsCollector::new(pid)).await
        else {
            self.unregister();
            return;
        };

        while !self.should_stop() {
            // /proc reads block, keep them off the async workers
            let collected = tokio::task::spawn_blocking(move || {
                let collected = collector.collect();
                (collector, collected)
            })
            .await;
            let (returned, collected) = match collected {
                Ok(pair) => pair,
                Err(e) => {
                    log::error!("PID {}: sampling task failed: {}", self.pid, e);
                    break;
                }
            };
            collector = returned;

            let (sample, snapshot) = match collected {
                Ok(collected) => collected,
                Err(JobError::ProcessGone(pid)) => {
                    log::debug!("PID {} is gone, poller exiting", pid);
                    break;
                }
                Err(e) => {
                    log::warn!("PID {}: sampling failed: {}", self.pid, e);
                    tokio::time::sleep(self.interval).await;
                    continue;
                }
            };
            let status = sample.status;

            {
                let mut state = lock(&self.state);
                if !state.is_current(self.pid, self.id) {
                    break;
                }
                state.stats.insert(self.pid, sample);
            }
            // may land once just after a stop_monitoring, bounded staleness
            self.history.record_process(self.pid, snapshot);

            if status.is_terminal() {
                log::info!("PID {} is {}, poller exiting", self.pid, status);
                break;
            }

            tokio::time::sleep(self.interval).await;
        }

        self.unregister();
    }

    /// Removes this poller's registration, leaving a newer poller for the
    /// same pid untouched.
    fn unregister(&self) {
        let mut state = lock(&self.state);
        if state.is_current(self.pid, self.id) {
            state.pollers.remove(&self.pid);
            state.stats.remove(&self.pid);
            log::debug!("Poller for PID {} unregistered", self.pid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Child, Command};

    const FAST: Duration = Duration::from_millis(200);

    fn monitor() -> (JobMonitor, Arc<MetricsHistory>) {
        let history = Arc::new(MetricsHistory::new(100));
        let monitor = JobMonitor::new(Handle::current(), FAST, history.clone());
        (monitor, history)
    }

    fn spawn_sleep(secs: &str) -> Child {
        Command::new("sleep").arg(secs).spawn().expect("spawn sleep")
    }

    #[tokio::test]
    async fn test_samples_on_a_single_threaded_runtime() {
        let (monitor, history) = monitor();
        let mut child = spawn_sleep("10");
        let pid = child.id();

        monitor.start_monitoring(pid);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(monitor.get_stats(pid).is_some());
        assert!(!history.query_process(pid, Duration::MAX).is_empty());

        monitor.stop_monitoring(pid);
        child.kill().ok();
        child.wait().ok();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_monitoring_is_idempotent() {
        let (monitor, _) = monitor();
        let mut child = spawn_sleep("10");
        let pid = child.id();

        assert!(monitor.start_monitoring(pid));
        assert!(!monitor.start_monitoring(pid));
        assert_eq!(monitor.monitored_count(), 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(monitor.get_all_stats().len(), 1);

        monitor.stop_monitoring(pid);
        child.kill().ok();
        child.wait().ok();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_running_process_then_natural_exit() {
        let (monitor, history) = monitor();
        let mut child = spawn_sleep("1");
        let pid = child.id();
        monitor.start_monitoring(pid);

        tokio::time::sleep(Duration::from_millis(500)).await;
        let sample = monitor.get_stats(pid).expect("sample while running");
        assert_eq!(sample.status, crate::models::JobStatus::Running);
        assert!(sample.ram_mb >= 0.0);

        // child exits after 1s and stays a zombie until waited on
        tokio::time::sleep(Duration::from_millis(1000) + FAST * 3).await;
        assert!(monitor.get_stats(pid).is_none());
        assert!(!monitor.is_monitoring(pid));
        assert!(history.process_len(pid) >= 2);

        child.wait().ok();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timestamps_do_not_go_backwards() {
        let (monitor, _) = monitor();
        let mut child = spawn_sleep("10");
        let pid = child.id();
        monitor.start_monitoring(pid);

        tokio::time::sleep(FAST * 2).await;
        let first = monitor.get_stats(pid).expect("first sample");
        tokio::time::sleep(FAST * 2).await;
        let second = monitor.get_stats(pid).expect("second sample");
        assert!(second.timestamp >= first.timestamp);

        monitor.stop_monitoring(pid);
        child.kill().ok();
        child.wait().ok();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_monitoring_clears_stats() {
        let (monitor, _) = monitor();
        let mut child = spawn_sleep("10");
        let pid = child.id();
        monitor.start_monitoring(pid);
        tokio::time::sleep(FAST * 2).await;
        assert!(monitor.get_stats(pid).is_some());

        assert!(monitor.stop_monitoring(pid));
        assert!(monitor.get_stats(pid).is_none());

        // the in-flight tick must not resurrect the entry
        tokio::time::sleep(FAST * 2).await;
        assert!(monitor.get_stats(pid).is_none());
        assert_eq!(monitor.monitored_count(), 0);
        assert!(!monitor.stop_monitoring(pid));

        child.kill().ok();
        child.wait().ok();
    }

    #[tokio::test]
    async fn test_unknown_pid_has_no_stats() {
        let (monitor, _) = monitor();
        assert!(monitor.get_stats(999_999).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_vanished_pid_unregisters() {
        let (monitor, _) = monitor();
        let mut child = Command::new("true").spawn().expect("spawn true");
        let pid = child.id();
        child.wait().ok();

        monitor.start_monitoring(pid);
        tokio::time::sleep(FAST).await;
        assert!(!monitor.is_monitoring(pid));
        assert!(monitor.get_stats(pid).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_stops_pollers() {
        let (monitor, _) = monitor();
        let mut child = spawn_sleep("10");
        let pid = child.id();
        monitor.start_monitoring(pid);
        tokio::time::sleep(FAST).await;

        monitor.shutdown();
        tokio::time::sleep(FAST * 3).await;
        assert_eq!(monitor.monitored_count(), 0);
        assert!(!monitor.start_monitoring(pid));

        child.kill().ok();
        child.wait().ok();
    }
}
