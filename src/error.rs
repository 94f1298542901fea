use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, JobError>;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("process {0} is gone")]
    ProcessGone(u32),

    #[error("access denied reading {metric} of process {pid}")]
    AccessDenied { pid: u32, metric: &'static str },

    #[error("failed to write log {path}: {source}")]
    SinkWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read log {path}: {source}")]
    SinkRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to terminate process {pid}: {source}")]
    Termination {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("invalid job id: {0}")]
    InvalidJobId(String),

    #[error("job {0} already exists")]
    JobExists(String),
}

impl JobError {
    pub fn pid_not_found(pid: u32) -> Self {
        JobError::NotFound(format!("process {}", pid))
    }

    pub fn job_not_found(job_id: &str) -> Self {
        JobError::NotFound(format!("job {}", job_id))
    }

    /// Errors caused by the request itself rather than by the host.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            JobError::InvalidCommand(_) | JobError::InvalidJobId(_) | JobError::JobExists(_)
        )
    }
}
