//! Agent executor boundary.
//!
//! The engine never talks to a model directly. Everything that needs an AI
//! agent (workflow `run_agent` steps, simple skills, build tasks, the
//! meta-planner) goes through the `AgentExecutor` trait:
//!
//! ```text
//! WorkflowInterpreter ─┐
//! SessionOrchestrator ─┼──▶ dyn AgentExecutor ──▶ ClaudeCliExecutor (subprocess)
//! MetaPlanner         ─┘                     └──▶ test fakes
//! ```

pub mod claude_cli;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

pub use claude_cli::ClaudeCliExecutor;

/// Receives incremental agent output as it streams in.
pub type OutputSink = Arc<dyn Fn(String) + Send + Sync>;

pub fn discard_output() -> OutputSink {
    Arc::new(|_| {})
}

#[derive(Clone)]
pub struct AgentRequest {
    /// Identifies the caller in logs (task id or `skill-<step>`).
    pub label: String,
    pub prompt: String,
    pub system_prompt: String,
    pub working_dir: PathBuf,
    pub on_output: OutputSink,
}

impl fmt::Debug for AgentRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRequest")
            .field("label", &self.label)
            .field("prompt", &self.prompt)
            .field("system_prompt", &self.system_prompt)
            .field("working_dir", &self.working_dir)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentResult {
    pub success: bool,
    pub summary: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl AgentResult {
    pub fn ok(summary: impl Into<String>) -> Self {
        Self {
            success: true,
            summary: summary.into(),
            ..Default::default()
        }
    }

    pub fn failed(summary: impl Into<String>) -> Self {
        Self {
            success: false,
            summary: summary.into(),
            ..Default::default()
        }
    }
}

/// Runs one agent prompt to completion.
///
/// Failures (missing binary, timeout, non-zero exit) are reported as an
/// `AgentResult` with `success: false`, never as a panic.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, request: AgentRequest) -> AgentResult;
}
