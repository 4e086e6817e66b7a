//! `elisa build`: Run a whole build session in-process.

use std::path::Path;

use dialoguer::Confirm;
use tokio::sync::broadcast::error::RecvError;

use elisa_core::models::ProjectSpec;
use elisa_core::orchestration::GateResponse;
use elisa_core::state::AppState;
use elisa_core::{EngineConfig, SessionEvent};

use super::{format_event, init_state};

pub fn load_spec(path: &Path) -> Result<ProjectSpec, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    ProjectSpec::from_json(&content)
}

pub async fn run(config: EngineConfig, spec_file: &str, auto_approve: bool) -> Result<(), String> {
    let spec = load_spec(Path::new(spec_file))?;
    let state = init_state(config)?;

    let summary = execute(&state, spec, |question, context| {
        if auto_approve {
            return GateResponse {
                approved: true,
                feedback: String::new(),
            };
        }
        println!("  {}", context);
        let approved = Confirm::new()
            .with_prompt(question)
            .default(true)
            .interact()
            .unwrap_or(false);
        GateResponse {
            approved,
            feedback: String::new(),
        }
    })
    .await?;

    println!("{}", summary);
    Ok(())
}

/// Run one session to completion, printing events and answering human
/// gates with `gate`. Returns the session summary, or the last fatal error
/// when the session ended without one.
pub async fn execute<F>(state: &AppState, spec: ProjectSpec, mut gate: F) -> Result<String, String>
where
    F: FnMut(&str, &str) -> GateResponse,
{
    let (session_id, orchestrator) = state.registry.create().await;
    println!("Session {} ({})", session_id, orchestrator.project_dir().display());

    let mut rx = orchestrator.events().subscribe();
    let handle = orchestrator.start(spec).await.map_err(|e| e.to_string())?;
    tokio::pin!(handle);

    let mut summary = None;
    let mut fatal = None;
    let on_event = |event: SessionEvent, summary: &mut Option<String>, fatal: &mut Option<String>| {
        if let Some(line) = format_event(&event) {
            println!("{}", line);
        }
        match event {
            SessionEvent::SessionComplete { summary: s } => *summary = Some(s),
            SessionEvent::Error {
                message,
                recoverable: false,
            } => *fatal = Some(message),
            _ => {}
        }
    };

    loop {
        tokio::select! {
            joined = &mut handle => {
                joined.map_err(|e| format!("Session aborted: {}", e))?;
                break;
            }
            received = rx.recv() => match received {
                Ok(SessionEvent::HumanGate { task_id, question, context }) => {
                    let response = gate(&question, &context);
                    orchestrator.respond_to_gate(Some(&task_id), response).await;
                }
                Ok(event) => on_event(event, &mut summary, &mut fatal),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    }

    // Events emitted just before the session task finished.
    while let Ok(event) = rx.try_recv() {
        on_event(event, &mut summary, &mut fatal);
    }

    summary
        .or(fatal)
        .ok_or_else(|| "Session ended without a summary".to_string())
}
