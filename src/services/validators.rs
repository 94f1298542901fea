use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;

use crate::error::{JobError, Result};

/// Arguments that are refused anywhere in a command
pub const DENYLIST: &[&str] = &["rm", "mkfs", "dd", "format", ">", ">>"];

lazy_static! {
    static ref JOB_ID: Regex = Regex::new(r"^[A-Za-z0-9_-][A-Za-z0-9_.-]{2,127}$")
        .expect("job id pattern is valid");
}

pub fn validate_command(command: &[String]) -> Result<()> {
    let Some(executable) = command.first() else {
        return Err(JobError::InvalidCommand("the command is empty".to_string()));
    };

    if Path::new(executable).is_absolute() {
        if !Path::new(executable).exists() {
            return Err(JobError::InvalidCommand(format!(
                "executable '{}' does not exist",
                executable
            )));
        }
    } else if find_in_path(executable).is_none() {
        return Err(JobError::InvalidCommand(format!(
            "command '{}' is not in PATH",
            executable
        )));
    }

    if let Some(denied) = command.iter().find(|arg| DENYLIST.contains(&arg.as_str())) {
        return Err(JobError::InvalidCommand(format!(
            "potentially dangerous command detected: '{}'",
            denied
        )));
    }

    Ok(())
}

/// Job ids become file names, so only a safe character set is accepted.
pub fn validate_job_id(job_id: &str) -> Result<()> {
    if job_id.len() < 3 {
        return Err(JobError::InvalidJobId(format!(
            "'{}' is too short, at least 3 characters are required",
            job_id
        )));
    }
    if !JOB_ID.is_match(job_id) {
        return Err(JobError::InvalidJobId(format!(
            "'{}' may only contain letters, digits, '_', '-' and '.'",
            job_id
        )));
    }
    Ok(())
}

/// `job_<YYYYmmdd_HHMMSS>_<8 hex chars>`
pub fn generate_job_id() -> String {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let unique = uuid::Uuid::new_v4().simple().to_string();
    format!("job_{}_{}", timestamp, &unique[..8])
}

fn find_in_path(program: &str) -> Option<std::path::PathBuf> {
    if program.contains('/') {
        let path = Path::new(program);
        return path.is_file().then(|| path.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_valid_command() {
        assert!(validate_command(&cmd(&["sleep", "1"])).is_ok());
        assert!(validate_command(&cmd(&["/bin/sh", "-c", "true"])).is_ok());
    }

    #[test]
    fn test_empty_command() {
        assert!(matches!(validate_command(&[]), Err(JobError::InvalidCommand(_))));
    }

    #[test]
    fn test_unknown_executable() {
        assert!(validate_command(&cmd(&["no-such-program-xyz"])).is_err());
        assert!(validate_command(&cmd(&["/no/such/program"])).is_err());
    }

    #[test]
    fn test_denylist() {
        assert!(validate_command(&cmd(&["rm", "-rf", "/tmp/x"])).is_err());
        assert!(validate_command(&cmd(&["echo", "hi", ">", "/tmp/x"])).is_err());
        // substrings are fine, only whole arguments are denied
        assert!(validate_command(&cmd(&["echo", "format-me"])).is_ok());
    }

    #[test]
    fn test_job_id_rules() {
        assert!(validate_job_id("job_20240101_000000_abcd1234").is_ok());
        assert!(validate_job_id("abc").is_ok());
        assert!(validate_job_id("ab").is_err());
        assert!(validate_job_id("../etc").is_err());
        assert!(validate_job_id("a/b/c").is_err());
        assert!(validate_job_id(".hidden").is_err());
    }

    #[test]
    fn test_generated_ids_are_valid_and_unique() {
        let a = generate_job_id();
        let b = generate_job_id();
        assert!(a.starts_with("job_"));
        assert_eq!(a.len(), "job_20240101_000000_abcd1234".len());
        assert!(validate_job_id(&a).is_ok());
        assert_ne!(a, b);
    }
}
