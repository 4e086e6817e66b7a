//! Shared application state for the axum server and the CLI.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::orchestration::Collaborators;
use crate::registry::SessionRegistry;

/// Shared state accessible by all API handlers.
pub struct AppStateInner {
    pub registry: SessionRegistry,
    pub config: EngineConfig,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    /// Wire the production collaborators from `config`.
    pub fn new(config: EngineConfig) -> Self {
        let collaborators = Collaborators::from_config(&config);
        Self::with_collaborators(config, collaborators)
    }

    pub fn with_collaborators(config: EngineConfig, collaborators: Collaborators) -> Self {
        Self {
            registry: SessionRegistry::new(config.clone(), collaborators),
            config,
        }
    }
}
