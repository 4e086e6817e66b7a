//! Bounded subprocess execution for build, publish, compile and flash steps.
//!
//! Children get an explicit environment (`shell_env::safe_env()` plus any
//! per-command additions), captured stdout/stderr and a wall-clock timeout.
//! On timeout, or when the awaiting future is dropped, the child is killed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::DeployError;
use crate::shell_env;

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
    /// Added on top of the filtered environment.
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>, cwd: &Path, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: cwd.to_path_buf(),
            timeout,
            env: HashMap::new(),
        }
    }

    /// Build from an argv vector; the first element is the program.
    pub fn from_argv(argv: &[String], cwd: &Path, timeout: Duration) -> Result<Self, DeployError> {
        let (program, args) = argv.split_first().ok_or_else(|| DeployError::Spawn {
            command: String::new(),
            message: "empty command".to_string(),
        })?;
        Ok(Self::new(program.clone(), args.to_vec(), cwd, timeout))
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub async fn run_command(spec: &CommandSpec) -> Result<CommandOutput, DeployError> {
    let program = shell_env::which(&spec.program).unwrap_or_else(|| spec.program.clone());
    tracing::debug!("[Process] Running {} (cwd: {})", spec.display(), spec.cwd.display());

    let child = Command::new(&program)
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .env_clear()
        .envs(shell_env::safe_env())
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DeployError::Spawn {
            command: spec.display(),
            message: e.to_string(),
        })?;

    match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }),
        Ok(Err(e)) => Err(DeployError::Failed {
            message: format!("{} failed: {}", spec.display(), e),
            recoverable: true,
        }),
        Err(_) => {
            tracing::warn!(
                "[Process] {} timed out after {}s, killed",
                spec.display(),
                spec.timeout.as_secs()
            );
            Err(DeployError::Timeout {
                command: spec.display(),
                secs: spec.timeout.as_secs(),
            })
        }
    }
}

/// Truncate to at most `max` characters.
pub fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
