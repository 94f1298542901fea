use std::collections::{HashMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use crate::error::{JobError, Result};
use crate::services::validators::validate_job_id;

pub const LOG_EXTENSION: &str = "log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
        }
    }
}

/// Which output stream of a job a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One append-only file per job in `log_dir`, named `<job_id>.log`.
///
/// Files are opened on first write and kept open until [`JobLogger::close`].
pub struct JobLogger {
    log_dir: PathBuf,
    sinks: Mutex<HashMap<String, Arc<Mutex<File>>>>,
}

impl JobLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let log_dir = log_dir.into();
        fs::create_dir_all(&log_dir)?;
        Ok(Self {
            log_dir,
            sinks: Mutex::new(HashMap::new()),
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn log_path(&self, job_id: &str) -> Result<PathBuf> {
        validate_job_id(job_id)?;
        Ok(self.log_dir.join(format!("{}.{}", job_id, LOG_EXTENSION)))
    }

    fn sink(&self, job_id: &str) -> Result<Arc<Mutex<File>>> {
        let mut sinks = lock(&self.sinks);
        if let Some(sink) = sinks.get(job_id) {
            return Ok(sink.clone());
        }

        let path = self.log_path(job_id)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| JobError::SinkWrite { path, source })?;
        let sink = Arc::new(Mutex::new(file));
        sinks.insert(job_id.to_string(), sink.clone());
        Ok(sink)
    }

    /// Releases the open file of `job_id`. The next write opens it again.
    pub fn close(&self, job_id: &str) {
        lock(&self.sinks).remove(job_id);
    }

    #[cfg(test)]
    pub fn open_sinks(&self) -> usize {
        lock(&self.sinks).len()
    }

    /// Appends `<timestamp> - <job_id> - <LEVEL> - <message>`.
    pub fn append(&self, job_id: &str, level: Level, message: &str) -> Result<()> {
        let sink = self.sink(job_id)?;
        let line = format!(
            "{} - {} - {} - {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            job_id,
            level.as_str(),
            message
        );

        let mut file = lock(&sink);
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|source| JobError::SinkWrite {
                path: self.log_dir.join(format!("{}.{}", job_id, LOG_EXTENSION)),
                source,
            })
    }

    /// Write failures are logged, never returned.
    fn append_or_log(&self, job_id: &str, level: Level, message: &str) {
        if let Err(e) = self.append(job_id, level, message) {
            log::error!("Job {}: {}", job_id, e);
        }
    }

    pub fn record_start(&self, job_id: &str, command: &[String], pid: u32) {
        let message = format!("Job started - PID: {} - Command: {}", pid, command.join(" "));
        self.append_or_log(job_id, Level::Info, &message);
    }

    pub fn record_end(&self, job_id: &str, pid: u32, exit_code: Option<i32>) {
        let code = exit_code.map_or_else(|| "None".to_string(), |c| c.to_string());
        let message = format!("Job finished - PID: {} - Exit Code: {}", pid, code);
        self.append_or_log(job_id, Level::Info, &message);
    }

    pub fn record_error(&self, job_id: &str, message: &str) {
        self.append_or_log(job_id, Level::Error, &format!("Error: {}", message));
    }

    pub fn record_output(&self, job_id: &str, stream: Stream, line: &str) {
        match stream {
            Stream::Stdout => self.append_or_log(job_id, Level::Info, &format!("stdout: {}", line)),
            Stream::Stderr => {
                self.append_or_log(job_id, Level::Warning, &format!("stderr: {}", line))
            }
        }
    }

    /// Last `max_lines` lines, oldest first. Empty when the job has no log.
    pub fn read_tail(&self, job_id: &str, max_lines: usize) -> Result<Vec<String>> {
        let path = self.log_path(job_id)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(JobError::SinkRead { path, source }),
        };

        let mut tail = VecDeque::with_capacity(max_lines.min(1024));
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|source| JobError::SinkRead {
                path: path.clone(),
                source,
            })?;
            if tail.len() == max_lines {
                tail.pop_front();
            }
            if max_lines > 0 {
                tail.push_back(line);
            }
        }
        Ok(tail.into())
    }

    pub fn delete(&self, job_id: &str) -> Result<()> {
        let path = self.log_path(job_id)?;
        lock(&self.sinks).remove(job_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(JobError::NotFound(format!("logs of job {}", job_id)))
            }
            Err(source) => Err(JobError::SinkWrite { path, source }),
        }
    }

    /// Deletes log files last modified before `now - retention`. Returns how
    /// many were removed; a file that cannot be removed is logged and skipped.
    pub fn purge_older_than(&self, retention: Duration) -> usize {
        let cutoff = SystemTime::now()
            .checked_sub(retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let entries = match fs::read_dir(&self.log_dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::error!("Cannot list log dir {}: {}", self.log_dir.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }

            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    log::warn!("Cannot stat {}: {}", path.display(), e);
                    continue;
                }
            };
            if modified >= cutoff {
                continue;
            }

            if let Some(job_id) = path.file_stem().and_then(|s| s.to_str()) {
                lock(&self.sinks).remove(job_id);
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    log::debug!("Removed old log {}", path.display());
                    removed += 1;
                }
                Err(source) => {
                    let err = JobError::SinkWrite { path, source };
                    log::error!("Error removing log: {}", err);
                }
            }
        }

        if removed > 0 {
            log::info!("Log cleanup removed {} file(s)", removed);
        }
        removed
    }
}
