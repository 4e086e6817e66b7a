//! Plan and skill definitions.
//!
//! A plan is an ordered list of steps, loadable from YAML or JSON:
//!
//! ```yaml
//! id: "pick-color"
//! name: "Pick a color"
//! steps:
//!   - type: ask_user
//!     id: ask
//!     question: "Pick a color"
//!     header: color
//!     options: ["Red", "Blue"]
//!     store_as: c
//!   - type: branch
//!     id: is-red
//!     context_key: c
//!     match_value: Red
//!     then_steps:
//!       - type: output
//!         id: out-red
//!         template: "red!"
//!   - type: output
//!     id: out
//!     template: "You picked {{c}}"
//! ```
//!
//! The camelCase spellings produced by the block editor (`storeAs`,
//! `contextKey`, `invoke_skill`, `set_context`, ...) are accepted as aliases.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::workspace::interpret_workspace;
use crate::error::WorkflowError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    AskUser {
        id: String,
        question: String,
        #[serde(default)]
        header: String,
        #[serde(default)]
        options: Vec<String>,
        #[serde(alias = "storeAs")]
        store_as: String,
    },
    Branch {
        id: String,
        #[serde(alias = "contextKey")]
        context_key: String,
        #[serde(alias = "matchValue")]
        match_value: String,
        #[serde(default, alias = "thenSteps")]
        then_steps: Vec<Step>,
    },
    #[serde(alias = "invoke_skill")]
    InvokeSubplan {
        id: String,
        #[serde(alias = "skillId", alias = "skill_id")]
        plan_id: String,
        #[serde(alias = "storeAs")]
        store_as: String,
    },
    RunAgent {
        id: String,
        prompt: String,
        #[serde(alias = "storeAs")]
        store_as: String,
    },
    #[serde(alias = "set_context")]
    SetVariable { id: String, key: String, value: String },
    Output { id: String, template: String },
}

impl Step {
    pub fn id(&self) -> &str {
        match self {
            Step::AskUser { id, .. }
            | Step::Branch { id, .. }
            | Step::InvokeSubplan { id, .. }
            | Step::RunAgent { id, .. }
            | Step::SetVariable { id, .. }
            | Step::Output { id, .. } => id,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Step::AskUser { .. } => "ask_user",
            Step::Branch { .. } => "branch",
            Step::InvokeSubplan { .. } => "invoke_subplan",
            Step::RunAgent { .. } => "run_agent",
            Step::SetVariable { .. } => "set_variable",
            Step::Output { .. } => "output",
        }
    }
}

/// An immutable, named sequence of steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    #[serde(alias = "skillId")]
    pub id: String,
    #[serde(default, alias = "skillName")]
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(id: impl Into<String>, name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            steps,
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        serde_yaml::from_str(yaml).map_err(|e| format!("Failed to parse plan YAML: {}", e))
    }

    pub fn from_json(json: &str) -> Result<Self, String> {
        serde_json::from_str(json).map_err(|e| format!("Failed to parse plan JSON: {}", e))
    }

    /// Load a plan from a `.json`, `.yaml` or `.yml` file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read plan file '{}': {}", path.display(), e))?;
        let plan = if is_json(path) {
            Self::from_json(&content)?
        } else {
            Self::from_yaml(&content)?
        };
        plan.validate().map_err(|e| e.to_string())?;
        Ok(plan)
    }

    /// Step ids must be unique across the plan, nested branch steps included.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        fn walk<'a>(
            plan_id: &str,
            steps: &'a [Step],
            seen: &mut HashSet<&'a str>,
        ) -> Result<(), WorkflowError> {
            for step in steps {
                if !seen.insert(step.id()) {
                    return Err(WorkflowError::DuplicateStep {
                        plan_id: plan_id.to_string(),
                        step_id: step.id().to_string(),
                    });
                }
                if let Step::Branch { then_steps, .. } = step {
                    walk(plan_id, then_steps, seen)?;
                }
            }
            Ok(())
        }
        walk(&self.id, &self.steps, &mut HashSet::new())
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SkillCategory {
    #[default]
    Simple,
    Composite,
}

/// A reusable skill: either a single prompt or a composite step graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkillSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub category: SkillCategory,
    /// Visual block workspace JSON for composite skills.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<Value>,
    /// Explicit steps for composite skills authored as text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<Step>>,
}

impl SkillSpec {
    pub fn simple(id: impl Into<String>, name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            prompt: prompt.into(),
            category: SkillCategory::Simple,
            workspace: None,
            steps: None,
        }
    }

    pub fn composite(plan: Plan) -> Self {
        Self {
            id: plan.id,
            name: plan.name,
            description: String::new(),
            prompt: String::new(),
            category: SkillCategory::Composite,
            workspace: None,
            steps: Some(plan.steps),
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        serde_yaml::from_str(yaml).map_err(|e| format!("Failed to parse skill YAML: {}", e))
    }

    /// The executable plan of a composite skill. `None` for simple skills
    /// and for composites with neither steps nor a workspace.
    pub fn to_plan(&self) -> Option<Plan> {
        if self.category != SkillCategory::Composite {
            return None;
        }
        if let Some(steps) = &self.steps {
            return Some(Plan::new(&self.id, &self.name, steps.clone()));
        }
        self.workspace
            .as_ref()
            .map(|ws| interpret_workspace(&self.id, &self.name, ws))
    }
}

/// All skills known to a run, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct SkillCatalog {
    skills: HashMap<String, SkillSpec>,
}

impl SkillCatalog {
    pub fn new(skills: Vec<SkillSpec>) -> Self {
        Self {
            skills: skills.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }

    pub fn insert(&mut self, skill: SkillSpec) {
        self.skills.insert(skill.id.clone(), skill);
    }

    pub fn get(&self, id: &str) -> Option<&SkillSpec> {
        self.skills.get(id)
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.skills.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Load every `.yaml`, `.yml` and `.json` skill file in a directory.
    /// Files that fail to parse are skipped with a warning.
    pub fn load_dir(dir: &Path) -> Result<Self, String> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| format!("Failed to read skills dir '{}': {}", dir.display(), e))?;

        let mut catalog = Self::default();
        for entry in entries.flatten() {
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if !matches!(ext, "yaml" | "yml" | "json") {
                continue;
            }
            let parsed = std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|content| {
                    if is_json(&path) {
                        serde_json::from_str::<SkillSpec>(&content).map_err(|e| e.to_string())
                    } else {
                        SkillSpec::from_yaml(&content)
                    }
                });
            match parsed {
                Ok(skill) => catalog.insert(skill),
                Err(e) => {
                    tracing::warn!("[SkillCatalog] Skipping {}: {}", path.display(), e);
                }
            }
        }

        tracing::info!(
            "[SkillCatalog] Loaded {} skills from {}",
            catalog.len(),
            dir.display()
        );
        Ok(catalog)
    }
}
