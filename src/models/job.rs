use serde::{Deserialize, Serialize};
use sysinfo::ProcessStatus;

/// Lifecycle state of a job's process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Stopped,
    Zombie,
    Dead,
}

impl JobStatus {
    /// Zombie, dead and stopped processes end a poller's loop.
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Stopped => "stopped",
            JobStatus::Zombie => "zombie",
            JobStatus::Dead => "dead",
        }
    }
}

impl From<ProcessStatus> for JobStatus {
    fn from(status: ProcessStatus) -> Self {
        match status {
            ProcessStatus::Stop | ProcessStatus::Tracing => JobStatus::Stopped,
            ProcessStatus::Zombie => JobStatus::Zombie,
            ProcessStatus::Dead => JobStatus::Dead,
            _ => JobStatus::Running,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A process launched on behalf of a caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier, also the log file name
    pub job_id: String,
    /// OS process id
    pub pid: u32,
    /// Program followed by its arguments
    pub command: Vec<String>,
    pub status: JobStatus,
    /// Unix timestamp (seconds) of the spawn
    pub created_at: f64,
}
