//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and drives the
//! elisa-core engine through `AppState`.

pub mod build;
pub mod server;
pub mod skill;

use std::path::PathBuf;
use std::sync::Arc;

use console::style;

use elisa_core::state::{AppState, AppStateInner};
use elisa_core::{EngineConfig, SessionEvent};

/// Engine configuration from the environment, with an optional projects
/// directory override.
pub fn engine_config(projects_dir: Option<&str>) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    if let Some(dir) = projects_dir {
        config.projects_dir = PathBuf::from(dir);
    }
    config
}

/// Initialize a shared `AppState` with the production collaborators.
pub fn init_state(config: EngineConfig) -> Result<AppState, String> {
    std::fs::create_dir_all(&config.projects_dir).map_err(|e| {
        format!(
            "Failed to create projects dir '{}': {}",
            config.projects_dir.display(),
            e
        )
    })?;
    Ok(Arc::new(AppStateInner::new(config)))
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

/// One terminal line for an event, or `None` for events not worth showing.
pub fn format_event(event: &SessionEvent) -> Option<String> {
    let line = match event {
        SessionEvent::PlanningStarted => format!("{} Planning...", style("◆").cyan()),
        SessionEvent::PlanReady { tasks, explanation, .. } => {
            let mut line = format!("{} Plan ready: {} tasks", style("◆").cyan(), tasks.len());
            if !explanation.is_empty() {
                line.push_str(&format!("\n  {}", explanation));
            }
            line
        }
        SessionEvent::TaskStarted { task_id, agent_name } => {
            format!("{} {} started by {}", style("▶").blue(), task_id, agent_name)
        }
        SessionEvent::TaskCompleted { task_id, summary } => {
            format!("{} {} done: {}", style("✓").green(), task_id, summary)
        }
        SessionEvent::TaskFailed { task_id, error } => {
            format!("{} {} failed: {}", style("✗").red(), task_id, error)
        }
        SessionEvent::CommitCreated { sha, message, .. } => {
            let short: String = sha.chars().take(7).collect();
            format!("  {} {}", style(short).dim(), message)
        }
        SessionEvent::TestResult { test_name, passed, .. } => {
            let mark = if *passed { style("PASS").green() } else { style("FAIL").red() };
            format!("  {} {}", mark, test_name)
        }
        SessionEvent::StepOutput { content, .. } => content.clone(),
        SessionEvent::PlanFailed { plan_id, message } => {
            format!("{} plan {} failed: {}", style("✗").red(), plan_id, message)
        }
        SessionEvent::DeployStarted { target } => {
            format!("{} Deploying {}", style("◆").cyan(), target.as_str())
        }
        SessionEvent::DeployChecklist { rules } => {
            let names: Vec<&str> = rules.iter().map(|r| r.name.as_str()).collect();
            format!("  checklist: {}", names.join(", "))
        }
        SessionEvent::DeployProgress { step, percent } => format!("  [{:>3}%] {}", percent, step),
        SessionEvent::DeployComplete { target, url } => match url {
            Some(url) => format!("{} {} deployed: {}", style("✓").green(), target.as_str(), url),
            None => format!("{} {} deployed", style("✓").green(), target.as_str()),
        },
        SessionEvent::Error { message, recoverable } => {
            let tag = if *recoverable { style("warning").yellow() } else { style("error").red() };
            format!("{}: {}", tag, message)
        }
        SessionEvent::SessionComplete { summary } => {
            format!("{} {}", style("★").green().bold(), summary)
        }
        _ => return None,
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_event_skips_noise() {
        assert!(format_event(&SessionEvent::AgentOutput {
            task_id: "a".into(),
            agent_name: "Builder Bot".into(),
            content: "...".into(),
        })
        .is_none());

        let line = format_event(&SessionEvent::DeployProgress {
            step: "Compiling code...".into(),
            percent: 25,
        })
        .unwrap();
        assert_eq!(line, "  [ 25%] Compiling code...");
    }

    #[test]
    fn test_projects_dir_override() {
        let config = engine_config(Some("/tmp/elisa-projects"));
        assert_eq!(config.projects_dir, PathBuf::from("/tmp/elisa-projects"));
    }
}
