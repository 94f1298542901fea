use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::models::{unix_timestamp, ProcessSnapshot, SystemSnapshot, Timestamped};

pub const DEFAULT_HISTORY_SIZE: usize = 1000;

/// Fixed-capacity FIFO buffer, oldest entries are evicted first.
#[derive(Debug, Clone)]
pub struct HistoryBuffer<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> HistoryBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        // capacity 0 would turn every push into a no-op
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_SIZE)),
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }
}

impl<T: Timestamped + Clone> HistoryBuffer<T> {
    /// Entries with `timestamp >= now - since`, oldest first.
    pub fn since(&self, since: Duration) -> Vec<T> {
        if since.is_zero() || self.is_empty() {
            return Vec::new();
        }
        let cutoff = unix_timestamp() - since.as_secs_f64();
        self.iter()
            .filter(|item| item.timestamp() >= cutoff)
            .cloned()
            .collect()
    }
}

/// Bounded history of system and per-process samples.
///
/// The system sequence and the per-pid map sit behind separate locks so that
/// pollers appending to their own pid never contend with the system sampler.
pub struct MetricsHistory {
    capacity: usize,
    system: Mutex<HistoryBuffer<SystemSnapshot>>,
    processes: Mutex<HashMap<u32, HistoryBuffer<ProcessSnapshot>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MetricsHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            system: Mutex::new(HistoryBuffer::new(capacity)),
            processes: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_system(&self, snapshot: SystemSnapshot) {
        lock(&self.system).push(snapshot);
    }

    pub fn record_process(&self, pid: u32, snapshot: ProcessSnapshot) {
        let capacity = self.capacity;
        lock(&self.processes)
            .entry(pid)
            .or_insert_with(|| HistoryBuffer::new(capacity))
            .push(snapshot);
    }

    pub fn query_system(&self, since: Duration) -> Vec<SystemSnapshot> {
        lock(&self.system).since(since)
    }

    /// Unknown pids yield an empty history.
    pub fn query_process(&self, pid: u32, since: Duration) -> Vec<ProcessSnapshot> {
        lock(&self.processes)
            .get(&pid)
            .map(|buffer| buffer.since(since))
            .unwrap_or_default()
    }

    pub fn latest_system(&self) -> Option<SystemSnapshot> {
        lock(&self.system).last().cloned()
    }

    pub fn latest_process(&self, pid: u32) -> Option<ProcessSnapshot> {
        lock(&self.processes)
            .get(&pid)
            .and_then(|buffer| buffer.last().cloned())
    }

    pub fn purge_process(&self, pid: u32) -> bool {
        lock(&self.processes).remove(&pid).is_some()
    }

    pub fn monitored_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = lock(&self.processes).keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    pub fn system_len(&self) -> usize {
        lock(&self.system).len()
    }

    #[cfg(test)]
    pub fn process_len(&self, pid: u32) -> usize {
        lock(&self.processes).get(&pid).map_or(0, |b| b.len())
    }
}

impl Default for MetricsHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;

    fn system_at(timestamp: f64, cpu: f32) -> SystemSnapshot {
        SystemSnapshot {
            cpu_percent: cpu,
            cpu_count: 1,
            per_cpu_percent: vec![cpu],
            ram_total_mb: 1024.0,
            ram_used_mb: 512.0,
            ram_available_mb: 512.0,
            ram_percent: 50.0,
            disk_total_gb: None,
            disk_used_gb: None,
            disk_free_gb: None,
            disk_percent: None,
            net_bytes_sent: None,
            net_bytes_recv: None,
            net_packets_sent: None,
            net_packets_recv: None,
            timestamp,
        }
    }

    fn process_at(pid: u32, timestamp: f64) -> ProcessSnapshot {
        ProcessSnapshot {
            pid,
            name: "sleep".to_string(),
            status: JobStatus::Running,
            cpu_percent: 0.0,
            rss_mb: 1.0,
            vms_mb: 2.0,
            num_threads: Some(1),
            create_time: 0,
            io_read_bytes: None,
            io_write_bytes: None,
            unavailable: Vec::new(),
            timestamp,
        }
    }

    #[test]
    fn test_buffer_evicts_oldest_first() {
        let mut buffer = HistoryBuffer::new(3);
        for i in 0..5 {
            buffer.push(i);
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(buffer.last(), Some(&4));
    }

    #[test]
    fn test_system_history_never_exceeds_capacity() {
        let history = MetricsHistory::new(10);
        let now = unix_timestamp();
        for i in 0..13 {
            history.record_system(system_at(now + i as f64 * 0.001, i as f32));
        }
        assert_eq!(history.system_len(), 10);

        let all = history.query_system(Duration::MAX);
        let cpus: Vec<f32> = all.iter().map(|s| s.cpu_percent).collect();
        assert_eq!(cpus, (3..13).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn test_query_system_window() {
        let history = MetricsHistory::new(100);
        let now = unix_timestamp();
        history.record_system(system_at(now - 600.0, 1.0));
        history.record_system(system_at(now - 30.0, 2.0));
        history.record_system(system_at(now - 1.0, 3.0));

        assert!(history.query_system(Duration::ZERO).is_empty());

        let recent = history.query_system(Duration::from_secs(60));
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].cpu_percent, 2.0);
        assert_eq!(recent[1].cpu_percent, 3.0);

        let all = history.query_system(Duration::MAX);
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_process_history_per_pid() {
        let history = MetricsHistory::new(2);
        let now = unix_timestamp();
        history.record_process(10, process_at(10, now - 2.0));
        history.record_process(10, process_at(10, now - 1.0));
        history.record_process(10, process_at(10, now));
        history.record_process(20, process_at(20, now));

        assert_eq!(history.process_len(10), 2);
        assert_eq!(history.process_len(20), 1);
        assert_eq!(history.monitored_pids(), vec![10, 20]);

        let ten = history.query_process(10, Duration::MAX);
        assert_eq!(ten.len(), 2);
        assert_eq!(ten[0].timestamp, now - 1.0);
        assert_eq!(history.latest_process(10).map(|s| s.timestamp), Some(now));
    }

    #[test]
    fn test_unknown_pid_has_empty_history() {
        let history = MetricsHistory::default();
        assert!(history.query_process(4242, Duration::MAX).is_empty());
        assert!(history.latest_process(4242).is_none());
    }

    #[test]
    fn test_purge_process() {
        let history = MetricsHistory::new(5);
        history.record_process(7, process_at(7, unix_timestamp()));
        assert!(history.purge_process(7));
        assert!(!history.purge_process(7));
        assert!(history.query_process(7, Duration::MAX).is_empty());
        assert!(history.monitored_pids().is_empty());
    }
}
