//! Command-execution portals.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::models::PortalSpec;
use crate::process::{run_command, CommandSpec};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortalOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait PortalRunner: Send + Sync {
    async fn execute(&self, portal: &PortalSpec, project_dir: &Path) -> PortalOutput;
}

/// Runs a portal's `command` + `args` in the project directory.
pub struct CommandPortalRunner {
    timeout: Duration,
}

impl CommandPortalRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl PortalRunner for CommandPortalRunner {
    async fn execute(&self, portal: &PortalSpec, project_dir: &Path) -> PortalOutput {
        let Some(command) = portal.command.as_deref().filter(|c| !c.trim().is_empty()) else {
            return PortalOutput {
                success: false,
                stdout: String::new(),
                stderr: format!("portal \"{}\" has no command", portal.name),
            };
        };

        let spec = CommandSpec::new(command, portal.args.clone(), project_dir, self.timeout);
        match run_command(&spec).await {
            Ok(out) => PortalOutput {
                success: out.success(),
                stdout: out.stdout,
                stderr: out.stderr,
            },
            Err(e) => PortalOutput {
                success: false,
                stdout: String::new(),
                stderr: e.to_string(),
            },
        }
    }
}
