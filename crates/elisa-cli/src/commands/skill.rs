//! `elisa skill`: Run skill plans and inspect block workspaces.

use std::path::Path;

use dialoguer::{Input, Select};
use tokio::sync::broadcast::error::RecvError;

use elisa_core::events::Question;
use elisa_core::state::AppState;
use elisa_core::workflow::{interpret_workspace, AnswerMap, Plan, SkillCatalog, SkillSpec};
use elisa_core::{EngineConfig, SessionEvent};

use super::{format_event, init_state, print_json};

/// Load a plan from YAML or JSON. Composite skill files are accepted too.
pub fn load_plan(path: &Path) -> Result<Plan, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");

    let skill: Result<SkillSpec, String> = if is_json {
        serde_json::from_str(&content).map_err(|e| e.to_string())
    } else {
        SkillSpec::from_yaml(&content)
    };
    if let Some(plan) = skill.ok().and_then(|s| s.to_plan()) {
        plan.validate().map_err(|e| e.to_string())?;
        return Ok(plan);
    }

    Plan::from_file(path)
}

/// Interpret a block workspace file into a plan named after the file.
pub fn parse_workspace_file(path: &Path) -> Result<Plan, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    let workspace: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| format!("Invalid workspace JSON: {}", e))?;
    let id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("workspace");
    Ok(interpret_workspace(id, id, &workspace))
}

pub fn parse(file: &str) -> Result<(), String> {
    let plan = parse_workspace_file(Path::new(file))?;
    let value = serde_json::to_value(&plan).map_err(|e| e.to_string())?;
    print_json(&value);
    Ok(())
}

pub async fn run(config: EngineConfig, file: &str, skills_dir: Option<&str>) -> Result<(), String> {
    let plan = load_plan(Path::new(file))?;
    let catalog = match skills_dir {
        Some(dir) => SkillCatalog::load_dir(Path::new(dir))?,
        None => SkillCatalog::default(),
    };
    let state = init_state(config)?;

    let result = execute(&state, plan, catalog, ask_interactively).await?;
    println!("\n{}", result);
    Ok(())
}

/// Prompt on the terminal. Returns `None` when the user aborts.
fn ask_interactively(question: &Question) -> Option<String> {
    if question.options.is_empty() {
        return Input::<String>::new()
            .with_prompt(&question.question)
            .interact_text()
            .ok();
    }
    let labels: Vec<&str> = question.options.iter().map(|o| o.label.as_str()).collect();
    let index = Select::new()
        .with_prompt(&question.question)
        .items(&labels)
        .default(0)
        .interact()
        .ok()?;
    Some(labels[index].to_string())
}

/// Run `plan` in a fresh session, printing events and answering questions
/// with `answer`.
pub async fn execute<F>(
    state: &AppState,
    plan: Plan,
    catalog: SkillCatalog,
    answer: F,
) -> Result<String, String>
where
    F: FnMut(&Question) -> Option<String>,
{
    execute_with(state, plan, catalog, answer, |event| {
        if let Some(line) = format_event(event) {
            println!("{}", line);
        }
    })
    .await
}

/// Like `execute`, handing every event other than questions to `show`.
pub async fn execute_with<F, S>(
    state: &AppState,
    plan: Plan,
    catalog: SkillCatalog,
    mut answer: F,
    mut show: S,
) -> Result<String, String>
where
    F: FnMut(&Question) -> Option<String>,
    S: FnMut(&SessionEvent),
{
    let (_, orchestrator) = state.registry.create().await;
    let mut rx = orchestrator.events().subscribe();

    let run = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_skill(&plan, catalog).await })
    };
    tokio::pin!(run);

    let mut listening = true;
    loop {
        tokio::select! {
            joined = &mut run => {
                // Events emitted just before the run finished.
                while let Ok(event) = rx.try_recv() {
                    show(&event);
                }
                return joined
                    .map_err(|e| format!("Skill run aborted: {}", e))?
                    .map_err(|e| e.to_string());
            }
            received = rx.recv(), if listening => match received {
                Ok(SessionEvent::QuestionRaised { step_id, questions, .. }) => {
                    let mut answers = AnswerMap::new();
                    for question in &questions {
                        let Some(value) = answer(question) else {
                            orchestrator.stop().await;
                            return Err("Cancelled".to_string());
                        };
                        let key = if question.header.is_empty() {
                            "answer".to_string()
                        } else {
                            question.header.clone()
                        };
                        answers.insert(key, serde_json::Value::String(value));
                    }
                    orchestrator.respond_to_question(&step_id, answers).await;
                }
                Ok(event) => show(&event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => listening = false,
            }
        }
    }
}
