use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use elisa_core::error::ServerError;
use elisa_core::models::ProjectSpec;
use elisa_core::orchestration::GateResponse;
use elisa_core::state::AppState;
use elisa_core::workflow::AnswerMap;
use elisa_core::SessionOrchestrator;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_session).get(list_sessions))
        .route("/{session_id}", get(get_session).delete(delete_session))
        .route("/{session_id}/start", post(start_session))
        .route("/{session_id}/stop", post(stop_session))
        .route("/{session_id}/tasks", get(list_tasks))
        .route("/{session_id}/git", get(list_commits))
        .route("/{session_id}/tests", get(list_test_results))
        .route("/{session_id}/gate", post(respond_to_gate))
        .route("/{session_id}/question", post(respond_to_question))
        .route("/{session_id}/events", get(session_events))
}

pub(crate) async fn lookup(state: &AppState, session_id: &str) -> Result<SessionOrchestrator, ServerError> {
    state
        .registry
        .get(session_id)
        .await
        .ok_or_else(|| ServerError::NotFound("Session not found".to_string()))
}

/// POST /api/sessions: Create an idle session.
async fn create_session(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (session_id, _) = state.registry.create().await;
    Json(serde_json::json!({ "session_id": session_id }))
}

/// GET /api/sessions: List session ids.
async fn list_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "sessions": state.registry.list().await }))
}

/// GET /api/sessions/{session_id}: Session state, tasks and agents.
async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let session = lookup(&state, &session_id).await?.snapshot().await;
    let value = serde_json::to_value(&session).map_err(|e| ServerError::Internal(e.to_string()))?;
    Ok(Json(value))
}

/// DELETE /api/sessions/{session_id}: Stop and forget a session.
async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    if !state.registry.remove(&session_id).await {
        return Err(ServerError::NotFound("Session not found".to_string()));
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    spec: ProjectSpec,
}

/// POST /api/sessions/{session_id}/start: Submit a spec and start building.
async fn start_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<StartRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let orchestrator = lookup(&state, &session_id).await?;
    // The session runs detached; observers follow it over /events.
    let _handle = orchestrator.start(body.spec).await?;
    Ok(Json(serde_json::json!({ "status": "started" })))
}

/// POST /api/sessions/{session_id}/stop: Cancel in-flight work.
async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let stopped = lookup(&state, &session_id).await?.stop().await;
    Ok(Json(serde_json::json!({ "status": "stopped", "was_running": stopped })))
}

async fn list_tasks(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let tasks = lookup(&state, &session_id).await?.tasks().await;
    Ok(Json(serde_json::json!({ "tasks": tasks })))
}

async fn list_commits(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let commits = lookup(&state, &session_id).await?.commits().await;
    Ok(Json(serde_json::json!({ "commits": commits })))
}

async fn list_test_results(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let results = lookup(&state, &session_id).await?.test_results().await;
    Ok(Json(serde_json::json!({ "tests": results })))
}

#[derive(Debug, Deserialize)]
struct GateRequest {
    #[serde(default)]
    task_id: Option<String>,
    #[serde(flatten)]
    response: GateResponse,
}

/// POST /api/sessions/{session_id}/gate: Approve or reject a human gate.
async fn respond_to_gate(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<GateRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let orchestrator = lookup(&state, &session_id).await?;
    let resolved = orchestrator
        .respond_to_gate(body.task_id.as_deref(), body.response)
        .await;
    Ok(Json(serde_json::json!({ "status": "ok", "resolved": resolved })))
}

#[derive(Debug, Deserialize)]
struct QuestionRequest {
    task_id: String,
    #[serde(default)]
    answers: AnswerMap,
}

/// POST /api/sessions/{session_id}/question: Answer a pending question.
async fn respond_to_question(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<QuestionRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let orchestrator = lookup(&state, &session_id).await?;
    let resolved = orchestrator
        .respond_to_question(&body.task_id, body.answers)
        .await;
    Ok(Json(serde_json::json!({ "status": "ok", "resolved": resolved })))
}

/// GET /api/sessions/{session_id}/events: SSE stream of session events.
///
/// Each event is sent with its `type` as the SSE event name and the JSON
/// body as data. Open questions and gates are replayed first. Slow
/// observers skip what they missed.
async fn session_events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let (replay, mut rx) = lookup(&state, &session_id)
        .await?
        .events()
        .subscribe_with_replay();

    let stream = async_stream::stream! {
        // Questions and gates raised before this observer connected.
        for event in replay {
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok::<_, Infallible>(Event::default().event(event.kind()).data(data));
        }
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let data = serde_json::to_string(&event).unwrap_or_default();
                    yield Ok::<_, Infallible>(Event::default().event(event.kind()).data(data));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("[Sessions] SSE observer lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
