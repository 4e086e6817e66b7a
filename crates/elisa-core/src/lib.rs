//! Elisa Core: Transport-agnostic engine for the Elisa build platform.
//!
//! This crate contains the workflow interpreter, the per-session build
//! orchestrator, the deployment pipeline and the models they share. It has
//! **no HTTP framework dependency** by default, making it suitable for use in:
//!
//! - HTTP servers (via `elisa-server`)
//! - CLI tools (via `elisa-cli`)
//!
//! # Feature Flags
//!
//! - `axum`: Enables `IntoResponse` impl on `ServerError` for use in axum handlers.

pub mod agent;
pub mod config;
pub mod deploy;
pub mod error;
pub mod events;
pub mod git;
pub mod models;
pub mod orchestration;
pub mod process;
pub mod registry;
pub mod shell_env;
pub mod state;
pub mod workflow;

// Convenience re-exports
pub use config::EngineConfig;
pub use error::{DeployError, ServerError, SessionError, WorkflowError};
pub use events::{EventChannel, SessionEvent};
pub use orchestration::SessionOrchestrator;
pub use registry::SessionRegistry;
pub use state::{AppState, AppStateInner};
