//! Runs the project's test suite after tester tasks and parses per-test
//! outcomes from verbose pytest output.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DeployError;
use crate::events::SessionEvent;
use crate::process::{self, CommandSpec};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestOutcome {
    pub test_name: String,
    pub passed: bool,
    pub details: String,
}

impl TestOutcome {
    fn failed(test_name: &str, details: impl Into<String>) -> Self {
        Self {
            test_name: test_name.to_string(),
            passed: false,
            details: details.into(),
        }
    }

    pub fn to_event(&self) -> SessionEvent {
        SessionEvent::TestResult {
            test_name: self.test_name.clone(),
            passed: self.passed,
            details: self.details.clone(),
        }
    }
}

fn result_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(.+?)\s+(PASSED|FAILED|ERROR|SKIPPED)").expect("static regex")
    })
}

/// Parse `path::test_name PASSED` style lines. Only PASSED counts as a pass.
pub fn parse_test_output(stdout: &str) -> Vec<TestOutcome> {
    stdout
        .lines()
        .filter_map(|line| {
            let caps = result_line().captures(line.trim())?;
            let status = caps.get(2)?.as_str();
            Some(TestOutcome {
                test_name: caps.get(1)?.as_str().trim().to_string(),
                passed: status == "PASSED",
                details: status.to_string(),
            })
        })
        .collect()
}

/// Run `command` in `project_dir`. Returns nothing when the project has no
/// `tests/` directory.
pub async fn run_tests(command: &[String], project_dir: &Path, timeout: Duration) -> Vec<TestOutcome> {
    if !project_dir.join("tests").is_dir() {
        return Vec::new();
    }

    let spec = match CommandSpec::from_argv(command, project_dir, timeout) {
        Ok(spec) => spec,
        Err(e) => return vec![TestOutcome::failed("test_command", e.to_string())],
    };
    let runner = spec.program.clone();

    match process::run_command(&spec).await {
        Ok(output) => {
            let mut results = parse_test_output(&output.stdout);
            if results.is_empty()
                && (output.stderr.contains("ModuleNotFoundError")
                    || output.stderr.contains("ImportError"))
            {
                results.push(TestOutcome::failed(
                    "import_check",
                    process::truncate(output.stderr.trim(), 500),
                ));
            }
            tracing::info!(
                "[TestRunner] {} results ({} passed)",
                results.len(),
                results.iter().filter(|r| r.passed).count()
            );
            results
        }
        Err(DeployError::Timeout { .. }) => {
            vec![TestOutcome::failed(&runner, "Test run timed out")]
        }
        Err(e) => {
            tracing::warn!("[TestRunner] {}", e);
            vec![TestOutcome::failed(&runner, format!("{} not found", runner))]
        }
    }
}
