//! Deployment phase controller.
//!
//! One `DeployPhase::run` per finished build. Each requested target runs its
//! own small state machine and reports through the session's event channel:
//!
//! ```text
//! web:      started ─▶ checklist? ─▶ 10 prepare ─▶ 30 build? ─▶ 80 url ─▶ 90 publish? ─▶ complete{url}
//! embedded: started ─▶ checklist? ─▶ 25 compile ─▶ 60 flash ─▶ complete
//!                                        └── fail ─┴── fail ──▶ error{recoverable}
//! portals:  started ─▶ checklist? ─▶ per portal: serial (25/60) | command (80/85) ─▶ complete
//! ```
//!
//! Live device monitoring after a flash is not part of this phase.

pub mod hardware;
pub mod portal;

use std::path::Path;
use std::sync::Arc;

use regex::Regex;

use crate::config::DeployConfig;
use crate::error::DeployError;
use crate::events::{EventChannel, SessionEvent};
use crate::models::{DeployTarget, PortalMechanism, PortalSpec, ProjectSpec};
use crate::process::{run_command, truncate, CommandSpec};

pub use hardware::{CommandHardwareService, CompileResult, FlashResult, HardwareService};
pub use portal::{CommandPortalRunner, PortalOutput, PortalRunner};

const OUTPUT_PREVIEW: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub enum DeployOutcome {
    Complete {
        url: Option<String>,
        /// Recoverable problems that did not stop the target.
        warnings: Vec<String>,
    },
    Failed {
        message: String,
        recoverable: bool,
    },
}

impl DeployOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, DeployOutcome::Complete { .. })
    }
}

pub struct DeployPhase {
    events: EventChannel,
    hardware: Arc<dyn HardwareService>,
    portals: Arc<dyn PortalRunner>,
    config: DeployConfig,
}

impl DeployPhase {
    pub fn new(
        events: EventChannel,
        hardware: Arc<dyn HardwareService>,
        portals: Arc<dyn PortalRunner>,
        config: DeployConfig,
    ) -> Self {
        Self {
            events,
            hardware,
            portals,
            config,
        }
    }

    /// Deploy every target the spec requests, in order.
    pub async fn run(
        &self,
        spec: &ProjectSpec,
        project_dir: &Path,
        session_id: &str,
    ) -> Vec<(DeployTarget, DeployOutcome)> {
        let mut outcomes = Vec::new();
        for target in spec.deploy_targets() {
            tracing::info!("[Deploy] Deploying target {}", target.as_str());
            let outcome = match target {
                DeployTarget::Web => self.deploy_web(spec, project_dir, session_id).await,
                DeployTarget::Embedded => self.deploy_embedded(spec, project_dir).await,
                DeployTarget::Portals => self.deploy_portals(spec, project_dir).await,
            };
            tracing::info!("[Deploy] {} finished: {:?}", target.as_str(), outcome);
            outcomes.push((target, outcome));
        }
        outcomes
    }

    fn begin(&self, target: DeployTarget, spec: &ProjectSpec) {
        self.events.emit(SessionEvent::DeployStarted { target });
        let rules = spec.checklist_rules();
        if !rules.is_empty() {
            self.events.emit(SessionEvent::DeployChecklist { rules });
        }
    }

    fn progress(&self, step: impl Into<String>, percent: u8) {
        self.events.emit(SessionEvent::progress(step, percent));
    }

    fn fail(&self, message: String, recoverable: bool) -> DeployOutcome {
        self.events.emit(SessionEvent::error(message.clone(), recoverable));
        DeployOutcome::Failed {
            message,
            recoverable,
        }
    }

    // ─── Web ────────────────────────────────────────────────────────────

    pub async fn deploy_web(
        &self,
        spec: &ProjectSpec,
        project_dir: &Path,
        session_id: &str,
    ) -> DeployOutcome {
        self.begin(DeployTarget::Web, spec);
        self.progress("Preparing web preview...", 10);

        let mut warnings = Vec::new();

        if let Some(argv) = self.build_command(project_dir) {
            self.progress("Running build...", 30);
            let result = match CommandSpec::from_argv(&argv, project_dir, self.config.build_timeout) {
                Ok(cmd) => run_command(&cmd).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(out) if out.success() => {}
                Ok(out) => {
                    let warning = format!(
                        "Build failed (exit {}): {}",
                        out.code.unwrap_or(-1),
                        truncate(&out.stderr, OUTPUT_PREVIEW)
                    );
                    self.progress(format!("Build warning: {}", warning), 30);
                    warnings.push(warning);
                }
                Err(e @ DeployError::Timeout { .. }) => {
                    return self.fail(format!("Build timed out: {}", e), true);
                }
                Err(e) => {
                    self.progress(format!("Build warning: {}", e), 30);
                    warnings.push(e.to_string());
                }
            }
        }

        self.progress("Preparing preview URL...", 80);
        let mut url = format!("/preview/{}", session_id);

        if let Some(token) = self.config.publish_token.as_deref() {
            self.progress("Publishing...", 90);
            match self.publish(token, project_dir).await {
                Ok(Some(published)) => {
                    url = published;
                    self.progress("Publish successful!", 100);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("[Deploy] Publish failed: {}", e);
                    self.progress(format!("Publish warning: {}", e), 95);
                    warnings.push(e.to_string());
                }
            }
        }

        self.events.emit(SessionEvent::DeployComplete {
            target: DeployTarget::Web,
            url: Some(url.clone()),
        });
        DeployOutcome::Complete {
            url: Some(url),
            warnings,
        }
    }

    /// Explicit build command, else `npm run build` when package.json has
    /// a build script.
    fn build_command(&self, project_dir: &Path) -> Option<Vec<String>> {
        if let Some(cmd) = &self.config.build_command {
            return Some(cmd.clone());
        }
        let pkg = std::fs::read_to_string(project_dir.join("package.json")).ok()?;
        let pkg: serde_json::Value = serde_json::from_str(&pkg).ok()?;
        pkg.pointer("/scripts/build")?;
        Some(vec!["npm".to_string(), "run".to_string(), "build".to_string()])
    }

    /// Run the publish CLI. `Ok(None)` means it succeeded without printing
    /// a recognisable URL.
    async fn publish(&self, token: &str, project_dir: &Path) -> Result<Option<String>, DeployError> {
        let mut argv = self.config.publish_command.clone();
        argv.push(format!("--token={}", token));
        let mut env_pairs: Vec<_> = self.config.app_env.iter().collect();
        env_pairs.sort();
        for (key, value) in env_pairs {
            let pair = format!("{}={}", key, value);
            argv.extend(["--build-env".to_string(), pair.clone(), "--env".to_string(), pair]);
        }

        let cmd = CommandSpec::from_argv(&argv, project_dir, self.config.build_timeout)?;
        let out = run_command(&cmd).await?;
        let combined = out.combined();
        if !out.success() {
            return Err(DeployError::Failed {
                message: format!(
                    "publish CLI failed (exit {}): {}",
                    out.code.unwrap_or(-1),
                    truncate(&combined, OUTPUT_PREVIEW)
                ),
                recoverable: true,
            });
        }

        let pattern = Regex::new(&self.config.publish_url_pattern).map_err(|e| DeployError::Failed {
            message: format!("invalid publish URL pattern: {}", e),
            recoverable: true,
        })?;
        Ok(pattern
            .find_iter(&combined)
            .last()
            .map(|m| m.as_str().to_string()))
    }

    // ─── Embedded ───────────────────────────────────────────────────────

    pub async fn deploy_embedded(&self, spec: &ProjectSpec, project_dir: &Path) -> DeployOutcome {
        self.begin(DeployTarget::Embedded, spec);

        if let Err(outcome) = self.compile_and_flash("Compiling code...", project_dir).await {
            return outcome;
        }

        self.events.emit(SessionEvent::DeployComplete {
            target: DeployTarget::Embedded,
            url: None,
        });
        DeployOutcome::Complete {
            url: None,
            warnings: Vec::new(),
        }
    }

    /// Compile then flash, stopping at the first failure.
    async fn compile_and_flash(&self, label: &str, project_dir: &Path) -> Result<(), DeployOutcome> {
        self.progress(label, 25);
        let compiled = self.hardware.compile(project_dir).await;
        if !compiled.success {
            let errors = compiled.errors.join(", ");
            self.progress(format!("Compile failed: {}", errors), 25);
            return Err(self.fail(format!("Compilation failed: {}", errors), true));
        }

        self.progress("Flashing to board...", 60);
        let flashed = self.hardware.flash(project_dir).await;
        if !flashed.success {
            self.progress(flashed.message.clone(), 60);
            return Err(self.fail(flashed.message, true));
        }
        Ok(())
    }

    // ─── Portals ────────────────────────────────────────────────────────

    pub async fn deploy_portals(&self, spec: &ProjectSpec, project_dir: &Path) -> DeployOutcome {
        self.begin(DeployTarget::Portals, spec);

        let mut warnings = Vec::new();
        for portal in &spec.portals {
            if let Some(warning) = self.deploy_portal(portal, project_dir).await {
                warnings.push(warning);
            }
        }

        self.events.emit(SessionEvent::DeployComplete {
            target: DeployTarget::Portals,
            url: None,
        });
        DeployOutcome::Complete {
            url: None,
            warnings,
        }
    }

    /// Deploy one portal. A failure is reported and returned, never raised.
    async fn deploy_portal(&self, portal: &PortalSpec, project_dir: &Path) -> Option<String> {
        match portal.mechanism {
            PortalMechanism::Serial => {
                let label = format!("Compiling code for serial portal \"{}\"...", portal.name);
                match self.compile_and_flash(&label, project_dir).await {
                    Ok(()) => None,
                    Err(DeployOutcome::Failed { message, .. }) => Some(message),
                    Err(DeployOutcome::Complete { .. }) => None,
                }
            }
            PortalMechanism::Cli => {
                self.progress(format!("Running CLI portal \"{}\"...", portal.name), 80);
                let out = self.portals.execute(portal, project_dir).await;
                if !out.stdout.is_empty() {
                    self.progress(truncate(&out.stdout, OUTPUT_PREVIEW), 85);
                }
                if out.success {
                    return None;
                }
                let message = format!(
                    "CLI portal \"{}\" failed: {}",
                    portal.name,
                    truncate(&out.stderr, OUTPUT_PREVIEW)
                );
                self.events.emit(SessionEvent::error(message.clone(), true));
                Some(message)
            }
            PortalMechanism::Unsupported => {
                tracing::warn!("[Deploy] Portal '{}' has an unsupported mechanism", portal.name);
                let message = format!("Portal \"{}\" skipped: unsupported mechanism", portal.name);
                self.progress(message.clone(), 80);
                Some(message)
            }
        }
    }
}
