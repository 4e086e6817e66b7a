//! Embedded-board compile and flash.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::DeployConfig;
use crate::error::DeployError;
use crate::process::{run_command, CommandSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileResult {
    pub success: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashResult {
    pub success: bool,
    pub message: String,
}

#[async_trait]
pub trait HardwareService: Send + Sync {
    async fn compile(&self, project_dir: &Path) -> CompileResult;
    async fn flash(&self, project_dir: &Path) -> FlashResult;
}

/// Compiles and flashes by running configured commands in the project dir.
pub struct CommandHardwareService {
    compile_command: Vec<String>,
    flash_command: Vec<String>,
    compile_timeout: Duration,
    flash_timeout: Duration,
}

impl CommandHardwareService {
    pub fn new(config: &DeployConfig) -> Self {
        Self {
            compile_command: config.compile_command.clone(),
            flash_command: config.flash_command.clone(),
            compile_timeout: config.build_timeout,
            flash_timeout: config.flash_timeout,
        }
    }
}

fn error_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl HardwareService for CommandHardwareService {
    async fn compile(&self, project_dir: &Path) -> CompileResult {
        let output = match CommandSpec::from_argv(&self.compile_command, project_dir, self.compile_timeout) {
            Ok(spec) => run_command(&spec).await,
            Err(e) => Err(e),
        };
        match output {
            Ok(out) if out.success() => CompileResult {
                success: true,
                errors: Vec::new(),
            },
            Ok(out) => {
                let mut errors = error_lines(&out.stderr);
                if errors.is_empty() {
                    errors = error_lines(&out.stdout);
                }
                if errors.is_empty() {
                    errors.push(format!("compiler exited with code {}", out.code.unwrap_or(-1)));
                }
                CompileResult {
                    success: false,
                    errors,
                }
            }
            Err(e) => CompileResult {
                success: false,
                errors: vec![e.to_string()],
            },
        }
    }

    async fn flash(&self, project_dir: &Path) -> FlashResult {
        let output = match CommandSpec::from_argv(&self.flash_command, project_dir, self.flash_timeout) {
            Ok(spec) => run_command(&spec).await,
            Err(e) => Err(e),
        };
        match output {
            Ok(out) if out.success() => FlashResult {
                success: true,
                message: "Flash complete".to_string(),
            },
            Ok(out) => {
                let detail = out.combined().trim().to_string();
                FlashResult {
                    success: false,
                    message: if detail.is_empty() {
                        format!("Flash failed (exit {})", out.code.unwrap_or(-1))
                    } else {
                        format!("Flash failed: {}", detail)
                    },
                }
            }
            Err(DeployError::Timeout { secs, .. }) => FlashResult {
                success: false,
                message: format!("Flash timed out after {}s", secs),
            },
            Err(e) => FlashResult {
                success: false,
                message: e.to_string(),
            },
        }
    }
}
