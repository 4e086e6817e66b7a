//! The project specification submitted to start a build session.
//!
//! Only the fields the engine acts on are typed; everything else the editor
//! sends is preserved in `extra` and forwarded to the planner verbatim.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Agent, Task};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProjectSpec {
    #[serde(default)]
    pub project: ProjectInfo,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<Value>,
    #[serde(default)]
    pub agents: Vec<Agent>,
    /// Pre-decomposed tasks. When present no planning call is made.
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<Deployment>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub portals: Vec<PortalSpec>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProjectInfo {
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Requirement {
    #[serde(default, rename = "type")]
    pub kind: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    #[serde(default = "default_target")]
    pub target: String,
    #[serde(default)]
    pub auto_flash: bool,
}

fn default_target() -> String {
    "preview".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub name: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub trigger: String,
}

/// A rule surfaced to the user before deploying.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChecklistRule {
    pub name: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PortalMechanism {
    Serial,
    #[serde(alias = "command")]
    Cli,
    #[default]
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortalSpec {
    pub name: String,
    #[serde(default)]
    pub mechanism: PortalMechanism,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeployTarget {
    Web,
    Embedded,
    Portals,
}

impl DeployTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Embedded => "embedded",
            Self::Portals => "portals",
        }
    }
}

impl ProjectSpec {
    pub fn from_json(json: &str) -> Result<Self, String> {
        serde_json::from_str(json).map_err(|e| format!("Failed to parse project spec: {}", e))
    }

    /// Targets requested by the spec, in deploy order.
    pub fn deploy_targets(&self) -> Vec<DeployTarget> {
        let mut targets = Vec::new();
        if let Some(deployment) = &self.deployment {
            match deployment.target.as_str() {
                "preview" | "web" => targets.push(DeployTarget::Web),
                "esp32" | "embedded" => targets.push(DeployTarget::Embedded),
                "both" => {
                    targets.push(DeployTarget::Web);
                    targets.push(DeployTarget::Embedded);
                }
                other => tracing::warn!("[Spec] Unknown deployment target '{}'", other),
            }
        }
        if !self.portals.is_empty() {
            targets.push(DeployTarget::Portals);
        }
        targets
    }

    pub fn checklist_rules(&self) -> Vec<ChecklistRule> {
        self.rules
            .iter()
            .filter(|r| r.trigger == "before_deploy")
            .map(|r| ChecklistRule {
                name: r.name.clone(),
                prompt: r.prompt.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_deployment_means_no_targets() {
        let spec = ProjectSpec::from_json(r#"{"project":{"goal":"a game"}}"#).unwrap();
        assert!(spec.deploy_targets().is_empty());
        assert_eq!(spec.project.goal, "a game");
    }

    #[test]
    fn test_both_with_portals() {
        let spec = ProjectSpec::from_json(
            r#"{
                "deployment": {"target": "both"},
                "portals": [{"name": "lamp", "mechanism": "serial"}]
            }"#,
        )
        .unwrap();
        assert_eq!(
            spec.deploy_targets(),
            vec![DeployTarget::Web, DeployTarget::Embedded, DeployTarget::Portals]
        );
    }

    #[test]
    fn test_portal_mechanisms() {
        let spec = ProjectSpec::from_json(
            r#"{"portals": [
                {"name": "a", "mechanism": "command", "command": "echo"},
                {"name": "b", "mechanism": "cli"},
                {"name": "c", "mechanism": "mcp"}
            ]}"#,
        )
        .unwrap();
        let mechanisms: Vec<_> = spec.portals.iter().map(|p| p.mechanism).collect();
        assert_eq!(
            mechanisms,
            vec![PortalMechanism::Cli, PortalMechanism::Cli, PortalMechanism::Unsupported]
        );
    }

    #[test]
    fn test_checklist_filters_before_deploy() {
        let spec = ProjectSpec::from_json(
            r#"{"rules": [
                {"name": "No secrets", "prompt": "check keys", "trigger": "before_deploy"},
                {"name": "Be nice", "prompt": "...", "trigger": "always"}
            ], "theme": "space"}"#,
        )
        .unwrap();
        let rules = spec.checklist_rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "No secrets");
        assert_eq!(spec.extra.get("theme"), Some(&Value::from("space")));
    }
}
