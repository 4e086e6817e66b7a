use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::Deserialize;

use elisa_core::error::ServerError;
use elisa_core::state::AppState;
use elisa_core::workflow::{AnswerMap, Plan, SkillCatalog, SkillSpec};

use super::sessions::lookup;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/run", post(run_skill))
        .route("/{session_id}/answer", post(answer_skill))
}

#[derive(Debug, Deserialize)]
struct RunSkillRequest {
    plan: Plan,
    #[serde(default, alias = "allSkills")]
    all_skills: Vec<SkillSpec>,
}

/// POST /api/skills/run: Run a skill plan in a fresh session.
///
/// Returns the session id at once; progress arrives on
/// `/api/sessions/{id}/events`, which replays any question already waiting.
async fn run_skill(
    State(state): State<AppState>,
    Json(body): Json<RunSkillRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    body.plan.validate()?;

    let (session_id, orchestrator) = state.registry.create().await;
    let catalog = SkillCatalog::new(body.all_skills);
    let plan = body.plan;
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run_skill(&plan, catalog).await {
            tracing::warn!("[Skills] Skill '{}' failed: {}", plan.id, e);
        }
    });

    Ok(Json(serde_json::json!({ "session_id": session_id })))
}

#[derive(Debug, Deserialize)]
struct AnswerRequest {
    step_id: String,
    #[serde(default)]
    answers: AnswerMap,
}

/// POST /api/skills/{session_id}/answer: Answer an `ask_user` step.
async fn answer_skill(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<AnswerRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let orchestrator = lookup(&state, &session_id).await?;
    let resolved = orchestrator
        .respond_to_question(&body.step_id, body.answers)
        .await;
    Ok(Json(serde_json::json!({ "status": "ok", "resolved": resolved })))
}
