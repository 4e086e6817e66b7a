//! Planning logic: turns a `ProjectSpec` into a task/agent roster.
//!
//! `MetaPlanner` asks the agent executor for a JSON plan. When the spec
//! already carries `tasks`, `StaticPlanner` uses them as-is and no agent
//! call is made.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::agent::{discard_output, AgentExecutor, AgentRequest};
use crate::error::SessionError;
use crate::models::{Agent, AgentStatus, ProjectSpec, Task, TaskStatus};

use super::prompts;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildPlan {
    pub tasks: Vec<Task>,
    pub agents: Vec<Agent>,
    pub explanation: String,
}

/// What the orchestrator does after a task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Keep dispatching tasks that do not depend on the failed one.
    Continue,
    /// Dispatch nothing new; let in-flight tasks finish.
    Halt,
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, spec: &ProjectSpec) -> Result<BuildPlan, SessionError>;

    fn on_task_failed(&self, _task: &Task) -> FailurePolicy {
        FailurePolicy::Continue
    }
}

// ─── Static ───────────────────────────────────────────────────────────────

/// Uses the spec's own tasks. Unassigned tasks go to the first agent.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticPlanner;

#[async_trait]
impl Planner for StaticPlanner {
    async fn plan(&self, spec: &ProjectSpec) -> Result<BuildPlan, SessionError> {
        let agents = roster(spec);
        let first = agents.first().map(|a| a.name.clone()).unwrap_or_default();
        let tasks = spec
            .tasks
            .iter()
            .cloned()
            .map(|mut task| {
                if task.agent_name.is_empty() {
                    task.agent_name = first.clone();
                }
                task
            })
            .collect();

        let plan = normalize(BuildPlan {
            tasks,
            agents,
            explanation: format!("Running {} tasks from the project spec.", spec.tasks.len()),
        });
        validate(&plan)?;
        Ok(plan)
    }
}

// ─── Meta-planner ─────────────────────────────────────────────────────────

pub struct MetaPlanner {
    executor: Arc<dyn AgentExecutor>,
    working_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    tasks: Vec<Task>,
    #[serde(default)]
    agents: Vec<Agent>,
    #[serde(default)]
    plan_explanation: String,
}

impl MetaPlanner {
    pub fn new(executor: Arc<dyn AgentExecutor>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            working_dir: working_dir.into(),
        }
    }

    async fn ask(&self, prompt: String) -> Result<String, SessionError> {
        let result = self
            .executor
            .execute(AgentRequest {
                label: "meta-planner".to_string(),
                prompt,
                system_prompt: prompts::META_PLANNER_SYSTEM.to_string(),
                working_dir: self.working_dir.clone(),
                on_output: discard_output(),
            })
            .await;
        if result.success {
            Ok(result.summary)
        } else {
            Err(SessionError::Planning(result.summary))
        }
    }
}

#[async_trait]
impl Planner for MetaPlanner {
    async fn plan(&self, spec: &ProjectSpec) -> Result<BuildPlan, SessionError> {
        if !spec.tasks.is_empty() {
            return StaticPlanner.plan(spec).await;
        }

        let mut spec = spec.clone();
        if spec.agents.is_empty() {
            spec.agents = Agent::default_roster();
        }
        let spec_json = serde_json::to_string_pretty(&spec)
            .map_err(|e| SessionError::Planning(e.to_string()))?;
        let user_msg = prompts::meta_planner_user(&spec_json);

        let text = self.ask(user_msg.clone()).await?;
        let raw = match parse_plan_json(&text) {
            Some(raw) => raw,
            None => {
                tracing::warn!("[MetaPlanner] First JSON parse failed, retrying");
                let retry = format!(
                    "{}\n\nYour previous response was:\n{}\n\n{}",
                    user_msg,
                    text,
                    prompts::META_PLANNER_RETRY
                );
                let text = self.ask(retry).await?;
                parse_plan_json(&text).ok_or_else(|| {
                    SessionError::Planning(
                        "Meta-planner failed to produce valid JSON after retry".to_string(),
                    )
                })?
            }
        };

        let agents = if raw.agents.is_empty() { spec.agents } else { raw.agents };
        let plan = normalize(BuildPlan {
            tasks: raw.tasks,
            agents,
            explanation: raw.plan_explanation,
        });
        validate(&plan)?;
        tracing::info!(
            "[MetaPlanner] Planned {} tasks for {} agents",
            plan.tasks.len(),
            plan.agents.len()
        );
        Ok(plan)
    }
}

fn fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*\n?(.*?)```").expect("static regex"))
}

/// Parse the planner reply, stripping a markdown fence if present.
fn parse_plan_json(text: &str) -> Option<RawPlan> {
    let trimmed = text.trim();
    let cleaned = fence()
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(trimmed);
    serde_json::from_str(cleaned).ok()
}

fn roster(spec: &ProjectSpec) -> Vec<Agent> {
    if spec.agents.is_empty() {
        Agent::default_roster()
    } else {
        spec.agents.clone()
    }
}

/// Every plan starts with pending tasks and idle agents.
fn normalize(mut plan: BuildPlan) -> BuildPlan {
    for task in &mut plan.tasks {
        task.status = TaskStatus::Pending;
    }
    for agent in &mut plan.agents {
        agent.status = AgentStatus::Idle;
    }
    plan
}

fn validate(plan: &BuildPlan) -> Result<(), SessionError> {
    if plan.tasks.is_empty() {
        return Err(SessionError::Planning("Plan must have at least one task".to_string()));
    }

    let mut ids = HashSet::new();
    for task in &plan.tasks {
        if !ids.insert(task.id.as_str()) {
            return Err(SessionError::Planning(format!("Duplicate task id {}", task.id)));
        }
    }

    let agents: HashSet<&str> = plan.agents.iter().map(|a| a.name.as_str()).collect();
    for task in &plan.tasks {
        for dep in &task.dependencies {
            if !ids.contains(dep.as_str()) {
                return Err(SessionError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        if !task.agent_name.is_empty() && !agents.contains(task.agent_name.as_str()) {
            return Err(SessionError::Planning(format!(
                "Task {} assigned to unknown agent {}",
                task.id, task.agent_name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentResult;
    use std::sync::Mutex;

    struct ScriptedExecutor {
        replies: Mutex<Vec<AgentResult>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn new(replies: Vec<AgentResult>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AgentExecutor for ScriptedExecutor {
        async fn execute(&self, request: AgentRequest) -> AgentResult {
            self.prompts.lock().unwrap().push(request.prompt);
            self.replies.lock().unwrap().remove(0)
        }
    }

    const PLAN: &str = r#"{
        "tasks": [
            {"id": "task-1", "name": "Board", "dependencies": [], "agent_name": "Builder Bot"},
            {"id": "task-2", "name": "Tests", "dependencies": ["task-1"], "agent_name": "Test Bot"}
        ],
        "agents": [
            {"name": "Builder Bot", "role": "builder"},
            {"name": "Test Bot", "role": "tester"}
        ],
        "plan_explanation": "First the board, then tests."
    }"#;

    #[tokio::test]
    async fn test_meta_planner_strips_fences() {
        let executor = ScriptedExecutor::new(vec![AgentResult::ok(format!("```json\n{}\n```", PLAN))]);
        let planner = MetaPlanner::new(executor.clone(), "/tmp");
        let plan = planner.plan(&ProjectSpec::default()).await.unwrap();

        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.explanation, "First the board, then tests.");
        // Default roster is injected into the prompt when the spec names no agents.
        assert!(executor.prompts.lock().unwrap()[0].contains("Review Bot"));
    }

    #[tokio::test]
    async fn test_meta_planner_retries_once_on_bad_json() {
        let executor = ScriptedExecutor::new(vec![
            AgentResult::ok("Sure! Here is a plan"),
            AgentResult::ok(PLAN),
        ]);
        let planner = MetaPlanner::new(executor.clone(), "/tmp");
        let plan = planner.plan(&ProjectSpec::default()).await.unwrap();

        assert_eq!(plan.tasks[1].dependencies, vec!["task-1"]);
        let prompts = executor.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("not valid JSON"));
    }

    #[tokio::test]
    async fn test_meta_planner_rejects_unknown_agent() {
        let bad = PLAN.replace("\"agent_name\": \"Test Bot\"", "\"agent_name\": \"Ghost\"");
        let executor = ScriptedExecutor::new(vec![AgentResult::ok(bad)]);
        let planner = MetaPlanner::new(executor, "/tmp");
        let err = planner.plan(&ProjectSpec::default()).await.unwrap_err();
        assert!(err.to_string().contains("unknown agent Ghost"));
    }

    #[tokio::test]
    async fn test_static_planner_assigns_first_agent() {
        let spec = ProjectSpec {
            tasks: vec![Task::new("a", "A"), Task::new("b", "B").with_agent("Review Bot")],
            ..Default::default()
        };
        let plan = StaticPlanner.plan(&spec).await.unwrap();
        assert_eq!(plan.tasks[0].agent_name, "Builder Bot");
        assert_eq!(plan.tasks[1].agent_name, "Review Bot");
        assert_eq!(plan.agents.len(), 3);
    }
}
