//! Error types for the Elisa engine.
//!
//! `ServerError` is the transport-facing error used by the control surface.
//! When the `axum` feature is enabled, it also implements `IntoResponse`
//! so it can be used directly as an axum handler error type.
//!
//! The remaining enums belong to the engine components: the workflow
//! interpreter, the deploy pipeline and the session orchestrator.

use crate::models::session::SessionState;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures raised while interpreting a plan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error("Cycle detected: plan \"{}\" is already on the call stack (stack: {})", .path.last().map(String::as_str).unwrap_or(""), .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Max nesting depth ({max}) exceeded")]
    DepthExceeded { max: usize },

    #[error("Unknown plan: {0}")]
    UnknownPlan(String),

    #[error("Duplicate step id '{step_id}' in plan '{plan_id}'")]
    DuplicateStep { plan_id: String, step_id: String },

    #[error("Step '{step_id}' failed: {message}")]
    Step { step_id: String, message: String },

    #[error("Agent failed: {0}")]
    Agent(String),

    #[error("Cancelled")]
    Cancelled,
}

impl WorkflowError {
    /// Structural errors are fatal to the invocation and never retried.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            WorkflowError::Cycle { .. }
                | WorkflowError::DepthExceeded { .. }
                | WorkflowError::UnknownPlan(_)
                | WorkflowError::DuplicateStep { .. }
        )
    }
}

/// Failures of external deploy operations (build, publish, compile, flash).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeployError {
    #[error("{command} timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("Failed to spawn {command}: {message}")]
    Spawn { command: String, message: String },

    #[error("{message}")]
    Failed { message: String, recoverable: bool },
}

impl DeployError {
    pub fn recoverable(&self) -> bool {
        match self {
            DeployError::Timeout { .. } | DeployError::Spawn { .. } => true,
            DeployError::Failed { recoverable, .. } => *recoverable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("Task dependency cycle among: {}", .0.join(", "))]
    CyclicTasks(Vec<String>),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Session already started")]
    AlreadyStarted,
}

impl From<WorkflowError> for ServerError {
    fn from(err: WorkflowError) -> Self {
        ServerError::BadRequest(err.to_string())
    }
}

impl From<SessionError> for ServerError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::AlreadyStarted | SessionError::InvalidTransition { .. } => {
                ServerError::Conflict(err.to_string())
            }
            other => ServerError::BadRequest(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// axum integration (opt-in via feature flag)
// ---------------------------------------------------------------------------

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let (status, message) = match &self {
            ServerError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ServerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ServerError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ServerError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}
