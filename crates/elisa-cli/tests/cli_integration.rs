//! Command-level tests: plan loading, workspace parsing, and in-process
//! skill and build runs with scripted answers.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use elisa_cli::commands::{build, skill};
use elisa_core::agent::{AgentExecutor, AgentRequest, AgentResult};
use elisa_core::deploy::{CompileResult, FlashResult, HardwareService, PortalOutput, PortalRunner};
use elisa_core::models::{PortalSpec, ProjectSpec, Task};
use elisa_core::orchestration::{Collaborators, GateResponse, StaticPlanner};
use elisa_core::state::{AppState, AppStateInner};
use elisa_core::workflow::{SkillCatalog, Step};
use elisa_core::EngineConfig;

struct OkExecutor;

#[async_trait]
impl AgentExecutor for OkExecutor {
    async fn execute(&self, request: AgentRequest) -> AgentResult {
        AgentResult::ok(format!("did {}", request.label))
    }
}

struct NoHardware;

#[async_trait]
impl HardwareService for NoHardware {
    async fn compile(&self, _dir: &Path) -> CompileResult {
        CompileResult {
            success: true,
            errors: vec![],
        }
    }

    async fn flash(&self, _dir: &Path) -> FlashResult {
        FlashResult {
            success: true,
            message: String::new(),
        }
    }
}

struct NoPortals;

#[async_trait]
impl PortalRunner for NoPortals {
    async fn execute(&self, _portal: &PortalSpec, _dir: &Path) -> PortalOutput {
        PortalOutput::default()
    }
}

fn test_state(dir: &tempfile::TempDir) -> AppState {
    let config = EngineConfig {
        projects_dir: dir.path().join("projects"),
        ..EngineConfig::default()
    };
    let collaborators = Collaborators {
        planner: Arc::new(StaticPlanner),
        executor: Arc::new(OkExecutor),
        hardware: Arc::new(NoHardware),
        portals: Arc::new(NoPortals),
    };
    Arc::new(AppStateInner::with_collaborators(config, collaborators))
}

const PICK_PLAN: &str = r#"
id: pick
name: Pick
steps:
  - type: ask_user
    id: ask
    question: Pick a color
    header: color
    options: [Red, Blue]
    storeAs: c
  - type: output
    id: out
    template: "You picked {{c}}"
"#;

#[test]
fn test_load_plan_from_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pick.yaml");
    std::fs::write(&path, PICK_PLAN).unwrap();

    let plan = skill::load_plan(&path).unwrap();
    assert_eq!(plan.id, "pick");
    assert_eq!(plan.steps.len(), 2);
    assert!(matches!(plan.steps[0], Step::AskUser { .. }));
}

#[test]
fn test_load_plan_accepts_composite_skill_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("greet.json");
    let skill_file = json!({
        "id": "greet",
        "name": "Greet",
        "category": "composite",
        "steps": [{"type": "output", "id": "o", "template": "hi"}]
    });
    std::fs::write(&path, skill_file.to_string()).unwrap();

    let plan = skill::load_plan(&path).unwrap();
    assert_eq!(plan.id, "greet");
    assert_eq!(plan.steps.len(), 1);
}

#[test]
fn test_load_plan_missing_file() {
    let err = skill::load_plan(Path::new("/definitely/not/here.yaml")).unwrap_err();
    assert!(err.contains("Failed to read"));
}

#[test]
fn test_parse_workspace_file_uses_file_stem() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hello.json");
    let workspace = json!({
        "blocks": {"blocks": [{
            "type": "skill_flow_start",
            "next": {"block": {
                "type": "skill_output",
                "id": "out",
                "fields": {"TEMPLATE": "Hello"}
            }}
        }]}
    });
    std::fs::write(&path, workspace.to_string()).unwrap();

    let plan = skill::parse_workspace_file(&path).unwrap();
    assert_eq!(plan.id, "hello");
    assert_eq!(plan.steps.len(), 1);
    assert_eq!(plan.steps[0].id(), "out");
}

#[test]
fn test_parse_workspace_file_rejects_bad_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    let err = skill::parse_workspace_file(&path).unwrap_err();
    assert!(err.starts_with("Invalid workspace JSON"));
}

#[tokio::test]
async fn test_skill_execute_answers_questions() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let path = dir.path().join("pick.yaml");
    std::fs::write(&path, PICK_PLAN).unwrap();
    let plan = skill::load_plan(&path).unwrap();

    let mut asked = Vec::new();
    let result = skill::execute(&state, plan, SkillCatalog::default(), |question| {
        asked.push(question.question.clone());
        Some("Blue".to_string())
    })
    .await
    .unwrap();

    assert_eq!(result, "You picked Blue");
    assert_eq!(asked, vec!["Pick a color"]);
}

#[tokio::test]
async fn test_skill_execute_shows_events_emitted_at_the_end() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let plan = elisa_core::workflow::Plan::new(
        "hello",
        "Hello",
        vec![Step::Output {
            id: "out".into(),
            template: "Hello".into(),
        }],
    );

    let mut shown = Vec::new();
    let result = skill::execute_with(
        &state,
        plan,
        SkillCatalog::default(),
        |_| None,
        |event| shown.push(event.kind()),
    )
    .await
    .unwrap();

    assert_eq!(result, "Hello");
    for kind in ["step_output", "plan_completed", "skill_result"] {
        assert!(shown.contains(&kind), "{kind} missing from {shown:?}");
    }
}

#[tokio::test]
async fn test_skill_execute_aborts_without_answer() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let path = dir.path().join("pick.yaml");
    std::fs::write(&path, PICK_PLAN).unwrap();
    let plan = skill::load_plan(&path).unwrap();

    let err = skill::execute(&state, plan, SkillCatalog::default(), |_| None)
        .await
        .unwrap_err();
    assert_eq!(err, "Cancelled");
}

#[tokio::test]
async fn test_build_execute_returns_summary() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    std::fs::create_dir_all(&state.config.projects_dir).unwrap();

    let mut gated = Task::new("b", "Snake");
    gated.dependencies = vec!["a".into()];
    gated.requires_approval = true;
    let spec = ProjectSpec {
        tasks: vec![Task::new("a", "Board"), gated],
        ..ProjectSpec::default()
    };

    let mut gates = Vec::new();
    let summary = build::execute(&state, spec, |question, context| {
        gates.push((question.to_string(), context.to_string()));
        GateResponse {
            approved: true,
            feedback: String::new(),
        }
    })
    .await
    .unwrap();

    assert!(summary.starts_with("Completed 2/2 tasks"), "{summary}");
    assert_eq!(gates.len(), 1);
    assert_eq!(gates[0].1, "did b");
}

#[tokio::test]
async fn test_build_execute_reports_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);

    let mut a = Task::new("a", "A");
    a.dependencies = vec!["b".into()];
    let mut b = Task::new("b", "B");
    b.dependencies = vec!["a".into()];
    let spec = ProjectSpec {
        tasks: vec![a, b],
        ..ProjectSpec::default()
    };

    let message = build::execute(&state, spec, |_, _| GateResponse {
        approved: true,
        feedback: String::new(),
    })
        .await
        .unwrap();
    assert!(message.contains("depend on each other"), "{message}");
}

#[test]
fn test_load_spec_reads_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spec.json");
    std::fs::write(
        &path,
        json!({"project": {"goal": "A game"}, "tasks": [{"id": "a", "name": "A"}]}).to_string(),
    )
    .unwrap();
    let spec = build::load_spec(&path).unwrap();
    assert_eq!(spec.tasks.len(), 1);
}
