//! Session registry: the only cross-session mutable state.
//!
//! Every operation takes the lock once and completes without suspending
//! while holding it, so create/get/remove are atomic.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::config::EngineConfig;
use crate::orchestration::{Collaborators, SessionOrchestrator};

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionOrchestrator>>,
    config: EngineConfig,
    collaborators: Collaborators,
}

impl SessionRegistry {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            collaborators,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create an idle session under a fresh id.
    pub async fn create(&self) -> (String, SessionOrchestrator) {
        let id = uuid::Uuid::new_v4().to_string();
        let orchestrator =
            SessionOrchestrator::new(id.clone(), self.collaborators.clone(), self.config.clone());
        self.sessions.write().await.insert(id.clone(), orchestrator.clone());
        tracing::info!("[Registry] Created session {}", id);
        (id, orchestrator)
    }

    pub async fn get(&self, id: &str) -> Option<SessionOrchestrator> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Remove and stop the session. Returns false if it was unknown.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id);
        match removed {
            Some(orchestrator) => {
                orchestrator.stop().await;
                tracing::info!("[Registry] Removed session {}", id);
                true
            }
            None => false,
        }
    }

    pub async fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionState;

    fn registry() -> SessionRegistry {
        let config = EngineConfig {
            projects_dir: std::env::temp_dir().join("elisa-registry-test"),
            ..EngineConfig::default()
        };
        let collaborators = Collaborators::from_config(&config);
        SessionRegistry::new(config, collaborators)
    }

    #[tokio::test]
    async fn test_create_get_remove() {
        let registry = registry();
        let (id, orchestrator) = registry.create().await;
        assert_eq!(orchestrator.id().await, id);
        assert!(registry.get(&id).await.is_some());
        assert_eq!(registry.list().await, vec![id.clone()]);

        assert!(registry.remove(&id).await);
        assert!(registry.get(&id).await.is_none());
        assert!(!registry.remove(&id).await);
        assert_eq!(orchestrator.state().await, SessionState::Done);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let registry = registry();
        let (a, _) = registry.create().await;
        let (b, _) = registry.create().await;
        assert_ne!(a, b);
        assert_eq!(registry.len().await, 2);
    }
}
