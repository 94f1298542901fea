use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::process_registry::STOP_GRACE_PERIOD;
use crate::services::OrchestratorConfig;

/// Mini Orchestrator - launches jobs and monitors their resources
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    /// Listen port
    #[arg(short, long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Listen address
    #[arg(short = 'a', long, env = "ADDRESS", default_value = "0.0.0.0")]
    pub address: String,

    /// Seconds between two samples of a job
    #[arg(long, env = "MONITOR_INTERVAL", default_value_t = 1.0, value_parser = parse_seconds)]
    pub monitor_interval: f64,

    /// Seconds between two system snapshots kept in history (0 disables)
    #[arg(long, env = "SYSTEM_SAMPLE_INTERVAL", default_value_t = 5.0, value_parser = parse_seconds)]
    pub system_sample_interval: f64,

    /// Samples kept per history buffer
    #[arg(long, env = "HISTORY_SIZE", default_value_t = 1000)]
    pub history_size: usize,

    /// Directory of the per-job log files
    #[arg(long, env = "LOG_DIR", default_value = "./logs")]
    pub log_dir: PathBuf,

    /// Job logs older than this many days are removed at startup
    #[arg(long, env = "LOG_RETENTION_DAYS", default_value_t = 7)]
    pub log_retention_days: u64,

    /// Origins allowed to call the API from a browser, comma separated
    #[arg(
        long,
        env = "CORS_ORIGINS",
        value_delimiter = ',',
        default_values_t = [
            "http://localhost:3000".to_string(),
            "http://localhost:3001".to_string()
        ]
    )]
    pub cors_origins: Vec<String>,
}

fn parse_seconds(s: &str) -> Result<f64, String> {
    let secs: f64 = s.parse().map_err(|e| format!("{}", e))?;
    Duration::try_from_secs_f64(secs)
        .map(|_| secs)
        .map_err(|_| format!("'{}' is not a non-negative number of seconds", s))
}

impl CommandArgs {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn log_retention(&self) -> Duration {
        Duration::from_secs(self.log_retention_days.saturating_mul(86_400))
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            // a zero poll interval would spin
            monitor_interval: Duration::from_secs_f64(self.monitor_interval.max(0.05)),
            system_sample_interval: Duration::from_secs_f64(self.system_sample_interval),
            history_size: self.history_size,
            log_dir: self.log_dir.clone(),
            stop_grace_period: STOP_GRACE_PERIOD,
        }
    }
}
