use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Agent, ProjectSpec, Task};
use crate::error::SessionError;

/// Lifecycle of a build session. Variants are declared in phase order so
/// the derived ordering expresses monotonic progress.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Planning,
    Building,
    Deploying,
    Done,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Building => "building",
            Self::Deploying => "deploying",
            Self::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == Self::Done
    }

    /// Forward-only. `Done` is reachable from every non-terminal state.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        !self.is_terminal() && next > *self
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub state: SessionState,
    pub spec: Option<ProjectSpec>,
    pub tasks: Vec<Task>,
    pub agents: Vec<Agent>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: SessionState::Idle,
            spec: None,
            tasks: Vec::new(),
            agents: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn transition(&mut self, to: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(to) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::debug!("[Session] {} {} -> {}", self.id, self.state, to);
        self.state = to;
        Ok(())
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    pub fn agent_mut(&mut self, name: &str) -> Option<&mut Agent> {
        self.agents.iter_mut().find(|a| a.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let mut session = Session::new("s1");
        session.transition(SessionState::Planning).unwrap();
        session.transition(SessionState::Building).unwrap();
        session.transition(SessionState::Done).unwrap();
        assert_eq!(session.state, SessionState::Done);
    }

    #[test]
    fn test_backward_transition_rejected() {
        let mut session = Session::new("s1");
        session.transition(SessionState::Building).unwrap();
        let err = session.transition(SessionState::Planning).unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidTransition {
                from: SessionState::Building,
                to: SessionState::Planning,
            }
        );
    }

    #[test]
    fn test_done_is_terminal() {
        for state in [
            SessionState::Idle,
            SessionState::Planning,
            SessionState::Building,
            SessionState::Deploying,
        ] {
            assert!(state.can_transition_to(SessionState::Done));
        }
        assert!(!SessionState::Done.can_transition_to(SessionState::Done));
        assert!(!SessionState::Done.can_transition_to(SessionState::Idle));
    }
}
