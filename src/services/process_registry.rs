use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::runtime::Handle;

use crate::error::{JobError, Result};
use crate::models::unix_timestamp;

/// Wait between SIGTERM and SIGKILL
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// A spawned process owned by the registry
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub pid: u32,
    pub command: Vec<String>,
    /// Unix timestamp (seconds) of the spawn
    pub started_at: f64,
    child: Arc<tokio::sync::Mutex<Child>>,
}

impl JobHandle {
    /// Exit code if the process already finished, without blocking.
    pub async fn try_exit_code(&self) -> Option<Option<i32>> {
        let mut child = self.child.lock().await;
        child.try_wait().ok().flatten().map(|status| status.code())
    }
}

/// Owns every spawned child, keyed by pid. The only place processes are
/// created or terminated.
pub struct ProcessRegistry {
    runtime: Handle,
    grace_period: Duration,
    jobs: Mutex<HashMap<u32, JobHandle>>,
}

impl ProcessRegistry {
    pub fn with_grace_period(runtime: Handle, grace_period: Duration) -> Self {
        Self {
            runtime,
            grace_period,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<u32, JobHandle>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns `command` with piped stdin, stdout and stderr.
    pub fn start(&self, command: &[String]) -> Result<u32> {
        let (program, args) = command.split_first().ok_or_else(|| JobError::Spawn {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })?;

        // the child's reaper is bound to the registry's runtime
        let _guard = self.runtime.enter();
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| JobError::Spawn {
                program: program.clone(),
                source,
            })?;

        let pid = child.id().ok_or_else(|| JobError::Spawn {
            program: program.clone(),
            source: std::io::Error::other("process exited before its pid was read"),
        })?;

        self.jobs().insert(
            pid,
            JobHandle {
                pid,
                command: command.to_vec(),
                started_at: unix_timestamp(),
                child: Arc::new(tokio::sync::Mutex::new(child)),
            },
        );

        log::info!("Spawned PID {}: {}", pid, command.join(" "));
        Ok(pid)
    }

    pub fn get(&self, pid: u32) -> Result<JobHandle> {
        self.jobs()
            .get(&pid)
            .cloned()
            .ok_or_else(|| JobError::pid_not_found(pid))
    }

    pub fn list(&self) -> HashMap<u32, JobHandle> {
        self.jobs().clone()
    }

    /// Hands out the captured output streams. Each stream is given out once.
    pub async fn take_output(&self, pid: u32) -> Result<(Option<ChildStdout>, Option<ChildStderr>)> {
        let handle = self.get(pid)?;
        let mut child = handle.child.lock().await;
        Ok((child.stdout.take(), child.stderr.take()))
    }

    /// Terminates `pid` and reports whether it is gone.
    pub async fn stop(&self, pid: u32) -> Result<bool> {
        self.terminate(pid).await.map(|_| true)
    }

    /// SIGTERM, then SIGKILL once the grace period runs out. Returns the exit
    /// code, `None` when the process died from a signal.
    pub async fn terminate(&self, pid: u32) -> Result<Option<i32>> {
        let handle = self.get(pid)?;
        let status = {
            let mut child = handle.child.lock().await;
            self.terminate_child(pid, &mut child).await?
        };

        self.jobs().remove(&pid);
        log::info!("✓ PID {} terminated ({})", pid, status);
        Ok(status.code())
    }

    async fn terminate_child(&self, pid: u32, child: &mut Child) -> Result<ExitStatus> {
        let termination = |source: std::io::Error| JobError::Termination { pid, source };

        if let Some(status) = child.try_wait().map_err(termination)? {
            return Ok(status);
        }

        match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(errno) => return Err(termination(std::io::Error::from(errno))),
        }

        match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(status) => status.map_err(termination),
            Err(_) => {
                log::warn!(
                    "PID {} ignored SIGTERM for {:?}, sending SIGKILL",
                    pid,
                    self.grace_period
                );
                child.kill().await.map_err(termination)?;
                child.wait().await.map_err(termination)
            }
        }
    }
}
