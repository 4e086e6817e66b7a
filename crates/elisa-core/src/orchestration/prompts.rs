//! System and task prompts for build agents and the meta-planner.

use crate::models::{Agent, AgentRole, ProjectSpec, Task};

// ─── Meta-planner ─────────────────────────────────────────────────────────

pub const META_PLANNER_SYSTEM: &str = r#"You are the Meta-Planner for Elisa, a kid-friendly IDE that orchestrates AI agents to build real software projects. A child has described a project with visual blocks; decompose it into a task DAG that named agents can execute.

## Rules
- Each task is small enough for one agent session and has testable acceptance criteria.
- Dependencies form a DAG. No circular dependencies.
- Order: scaffolding, features, tests, review.
- Every requirement has at least one task. Include a testing task and a review task.
- Assign every task to exactly one agent by name. Roles: builder, tester, reviewer.

## Output
Output ONLY a JSON object, no markdown fences, no commentary:

{
  "tasks": [
    {
      "id": "task-1",
      "name": "Short task name",
      "description": "What the agent should do",
      "acceptance_criteria": ["Criterion"],
      "dependencies": [],
      "agent_name": "Builder Bot"
    }
  ],
  "agents": [
    {
      "name": "Builder Bot",
      "role": "builder",
      "persona": "A friendly robot who loves building things",
      "allowed_paths": ["src/", "tests/"],
      "restricted_paths": [".elisa/"]
    }
  ],
  "plan_explanation": "A short explanation a 10-year-old understands"
}

Task ids use "task-N" format. Every dependency id and agent_name must exist in the output."#;

pub const META_PLANNER_RETRY: &str = "Your response was not valid JSON. Output ONLY the JSON object with no markdown code fences or commentary.";

pub fn meta_planner_user(spec_json: &str) -> String {
    format!(
        "Here is the kid's project specification. Decompose it into a task DAG.\n\nProjectSpec:\n{}",
        spec_json
    )
}

// ─── Role prompts ─────────────────────────────────────────────────────────

const BUILDER_ROLE: &str = "You are a builder. Write the code this task asks for, keep changes small, and leave the project runnable.";
const TESTER_ROLE: &str = "You are a tester. Write pytest tests under tests/ that check the acceptance criteria, then run them and report what passed.";
const REVIEWER_ROLE: &str = "You are a reviewer. Read the code other agents wrote, fix small problems directly and summarize what could be better.";
const CUSTOM_ROLE: &str = "You are a specialist helper. Complete the task exactly as described.";

fn role_instructions(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Builder => BUILDER_ROLE,
        AgentRole::Tester => TESTER_ROLE,
        AgentRole::Reviewer => REVIEWER_ROLE,
        AgentRole::Custom => CUSTOM_ROLE,
    }
}

/// System prompt for `agent` working on `task_id`.
pub fn system_prompt(agent: &Agent, task_id: &str) -> String {
    format!(
        "You are {name}, an agent on a team building a project for a kid.\n\
         Persona: {persona}\n\n\
         {role}\n\n\
         ## Boundaries\n\
         - You may create and modify files only in: {allowed}\n\
         - Never touch: {restricted}\n\
         - You are working on task {task_id}. When finished, reply with a 1-3 sentence summary of what you did.",
        name = agent.name,
        persona = agent.persona,
        role = role_instructions(agent.role),
        allowed = agent.allowed_paths.join(", "),
        restricted = agent.restricted_paths.join(", "),
        task_id = task_id,
    )
}

/// User prompt for one task: goal, task details, and what earlier tasks did.
pub fn task_prompt(task: &Task, spec: &ProjectSpec, predecessors: &[String]) -> String {
    let mut prompt = format!("# Task: {}\n\n{}\n", task.name, task.description);

    if !task.acceptance_criteria.is_empty() {
        prompt.push_str("\n## Acceptance Criteria\n");
        for criterion in &task.acceptance_criteria {
            prompt.push_str(&format!("- {}\n", criterion));
        }
    }

    if !spec.project.goal.is_empty() {
        prompt.push_str(&format!("\n## Project Goal\n{}\n", spec.project.goal));
    }
    if !spec.requirements.is_empty() {
        prompt.push_str("\n## Requirements\n");
        for req in &spec.requirements {
            prompt.push_str(&format!("- {}\n", req.description));
        }
    }
    if let Some(style) = &spec.style {
        prompt.push_str(&format!("\n## Style\n{}\n", style));
    }

    if !predecessors.is_empty() {
        prompt.push_str("\n## What Happened Before\n");
        for summary in predecessors {
            prompt.push_str(&format!("- {}\n", summary));
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_includes_boundaries() {
        let agent = Agent::new("Test Bot", AgentRole::Tester, "A careful detective");
        let prompt = system_prompt(&agent, "task-2");
        assert!(prompt.contains("You are Test Bot"));
        assert!(prompt.contains("src/, tests/"));
        assert!(prompt.contains(".elisa/"));
        assert!(prompt.contains("task-2"));
        assert!(prompt.contains("pytest"));
    }

    #[test]
    fn test_task_prompt_lists_predecessors() {
        let mut task = Task::new("task-2", "Add score");
        task.acceptance_criteria = vec!["Score goes up".into()];
        let mut spec = ProjectSpec::default();
        spec.project.goal = "A snake game".into();

        let prompt = task_prompt(&task, &spec, &["Made the board".to_string()]);
        assert!(prompt.starts_with("# Task: Add score"));
        assert!(prompt.contains("- Score goes up"));
        assert!(prompt.contains("A snake game"));
        assert!(prompt.contains("- Made the board"));
    }
}
