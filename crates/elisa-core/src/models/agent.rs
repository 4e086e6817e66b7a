use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    #[default]
    Builder,
    Tester,
    Reviewer,
    #[serde(other)]
    Custom,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Builder => "builder",
            Self::Tester => "tester",
            Self::Reviewer => "reviewer",
            Self::Custom => "custom",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "builder" => Self::Builder,
            "tester" => Self::Tester,
            "reviewer" => Self::Reviewer,
            _ => Self::Custom,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Working,
    Done,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub name: String,
    #[serde(default)]
    pub role: AgentRole,
    #[serde(default)]
    pub persona: String,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default = "default_allowed_paths")]
    pub allowed_paths: Vec<String>,
    #[serde(default = "default_restricted_paths")]
    pub restricted_paths: Vec<String>,
}

fn default_allowed_paths() -> Vec<String> {
    vec!["src/".to_string(), "tests/".to_string()]
}

fn default_restricted_paths() -> Vec<String> {
    vec![".elisa/".to_string()]
}

impl Agent {
    pub fn new(name: impl Into<String>, role: AgentRole, persona: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role,
            persona: persona.into(),
            status: AgentStatus::Idle,
            allowed_paths: default_allowed_paths(),
            restricted_paths: default_restricted_paths(),
        }
    }

    /// Roster used when a spec names no agents.
    pub fn default_roster() -> Vec<Agent> {
        vec![
            Agent::new(
                "Builder Bot",
                AgentRole::Builder,
                "A friendly robot who loves building things and explaining how they work.",
            ),
            Agent::new(
                "Test Bot",
                AgentRole::Tester,
                "A careful detective who checks everything twice to make sure it works.",
            ),
            Agent::new(
                "Review Bot",
                AgentRole::Reviewer,
                "A helpful teacher who looks at code and suggests ways to make it even better.",
            ),
        ]
    }
}
