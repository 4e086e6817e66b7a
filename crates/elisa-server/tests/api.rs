//! HTTP API tests driven through the router without a socket.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tokio_stream::StreamExt;
use tower::ServiceExt;

use elisa_core::agent::{AgentExecutor, AgentRequest, AgentResult};
use elisa_core::deploy::{CompileResult, FlashResult, HardwareService, PortalOutput, PortalRunner};
use elisa_core::models::{PortalSpec, TaskStatus};
use elisa_core::orchestration::{Collaborators, StaticPlanner};
use elisa_core::state::{AppState, AppStateInner};
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
        projects_dir: dir.path().to_path_buf(),
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

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let app = elisa_server::build_router(test_state(&dir));
    let (status, body) = send(&app, "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_unknown_session_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = elisa_server::build_router(test_state(&dir));
    for (method, uri) in [
        ("GET", "/api/sessions/nope"),
        ("GET", "/api/sessions/nope/tasks"),
        ("POST", "/api/sessions/nope/stop"),
        ("GET", "/api/sessions/nope/events"),
    ] {
        let (status, body) = send(&app, method, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
        assert_eq!(body["error"], "Session not found");
    }
}

#[tokio::test]
async fn test_session_build_flow() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let app = elisa_server::build_router(state.clone());

    let (status, body) = send(&app, "POST", "/api/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    let id = body["session_id"].as_str().unwrap().to_string();

    let (_, session) = send(&app, "GET", &format!("/api/sessions/{id}"), None).await;
    assert_eq!(session["state"], "idle");

    let spec = json!({
        "spec": {
            "project": {"goal": "A snake game"},
            "tasks": [
                {"id": "a", "name": "Board"},
                {"id": "b", "name": "Snake", "dependencies": ["a"]}
            ]
        }
    });
    let (status, body) = send(&app, "POST", &format!("/api/sessions/{id}/start"), Some(spec.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "started");

    let (status, _) = send(&app, "POST", &format!("/api/sessions/{id}/start"), Some(spec)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let orchestrator = state.registry.get(&id).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !orchestrator.state().await.is_terminal() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert!(orchestrator
        .tasks()
        .await
        .iter()
        .all(|t| t.status == TaskStatus::Done));

    let (_, body) = send(&app, "GET", &format!("/api/sessions/{id}/tasks"), None).await;
    assert_eq!(body["tasks"].as_array().unwrap().len(), 2);
    assert_eq!(body["tasks"][0]["status"], "done");

    let (status, body) = send(&app, "GET", &format!("/api/sessions/{id}/tests"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["tests"].as_array().unwrap().is_empty());

    let (status, _) = send(&app, "GET", &format!("/api/sessions/{id}/git"), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_stop_idle_session() {
    let dir = tempfile::tempdir().unwrap();
    let app = elisa_server::build_router(test_state(&dir));
    let (_, body) = send(&app, "POST", "/api/sessions", None).await;
    let id = body["session_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "POST", &format!("/api/sessions/{id}/stop"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["was_running"], true);

    let (_, session) = send(&app, "GET", &format!("/api/sessions/{id}"), None).await;
    assert_eq!(session["state"], "done");
}

#[tokio::test]
async fn test_gate_without_pending_gate_is_unresolved() {
    let dir = tempfile::tempdir().unwrap();
    let app = elisa_server::build_router(test_state(&dir));
    let (_, body) = send(&app, "POST", "/api/sessions", None).await;
    let id = body["session_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/sessions/{id}/gate"),
        Some(json!({"approved": false, "feedback": "no"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resolved"], false);
}

#[tokio::test]
async fn test_skill_run_with_answer() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let app = elisa_server::build_router(state.clone());

    let request = json!({
        "plan": {
            "id": "pick",
            "name": "Pick",
            "steps": [
                {"type": "ask_user", "id": "ask", "question": "Pick a color",
                 "header": "color", "options": ["Red", "Blue"], "storeAs": "c"},
                {"type": "output", "id": "out", "template": "You picked {{c}}"}
            ]
        },
        "all_skills": []
    });
    let (status, body) = send(&app, "POST", "/api/skills/run", Some(request)).await;
    assert_eq!(status, StatusCode::OK);
    let id = body["session_id"].as_str().unwrap().to_string();

    let orchestrator = state.registry.get(&id).await.unwrap();
    let mut rx = orchestrator.events().subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        while orchestrator.open_questions().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/skills/{id}/answer"),
        Some(json!({"step_id": "ask", "answers": {"color": "Red"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resolved"], true);

    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let elisa_core::SessionEvent::SkillResult { result, .. } = rx.recv().await.unwrap() {
                return result;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(result, "You picked Red");
}

#[tokio::test]
async fn test_skill_run_rejects_duplicate_step_ids() {
    let dir = tempfile::tempdir().unwrap();
    let app = elisa_server::build_router(test_state(&dir));
    let request = json!({
        "plan": {
            "id": "dup",
            "steps": [
                {"type": "output", "id": "x", "template": "a"},
                {"type": "output", "id": "x", "template": "b"}
            ]
        }
    });
    let (status, body) = send(&app, "POST", "/api/skills/run", Some(request)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("x"));
}

#[tokio::test]
async fn test_late_event_subscriber_still_sees_open_question() {
    let dir = tempfile::tempdir().unwrap();
    let app = elisa_server::build_router(test_state(&dir));

    let request = json!({
        "plan": {
            "id": "pick",
            "steps": [
                {"type": "ask_user", "id": "ask", "question": "Pick a color",
                 "header": "color", "options": ["Red", "Blue"], "storeAs": "c"},
                {"type": "output", "id": "out", "template": "You picked {{c}}"}
            ]
        },
        "allSkills": [{"id": "greet", "name": "Greet", "prompt": "hi"}]
    });
    let (status, body) = send(&app, "POST", "/api/skills/run", Some(request)).await;
    assert_eq!(status, StatusCode::OK);
    let id = body["session_id"].as_str().unwrap().to_string();

    // A client opens the stream only after the run has reached the question.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/sessions/{id}/events"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stream = response.into_body().into_data_stream();
    tokio::pin!(stream);
    let received = tokio::time::timeout(Duration::from_secs(2), async {
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            text.push_str(&String::from_utf8_lossy(&chunk.unwrap()));
            if text.contains("event: question_raised") {
                return text;
            }
        }
        text
    })
    .await
    .expect("question_raised was not delivered");
    assert!(received.contains("Pick a color"));

    let (_, body) = send(
        &app,
        "POST",
        &format!("/api/skills/{id}/answer"),
        Some(json!({"step_id": "ask", "answers": {"color": "Blue"}})),
    )
    .await;
    assert_eq!(body["resolved"], true);
}
