//! Engine configuration.
//!
//! Every knob has a default; `EngineConfig::from_env()` overlays the
//! `ELISA_*` environment variables (plus `VERCEL_TOKEN` for publishing).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Maximum nesting depth of plan invocations.
pub const MAX_PLAN_DEPTH: usize = 10;

/// Default capacity of a session's event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root under which per-session project directories are created.
    pub projects_dir: PathBuf,
    pub agent: AgentConfig,
    pub deploy: DeployConfig,
    /// Command run after tester tasks; output is parsed into test results.
    pub test_command: Vec<String>,
    pub test_timeout: Duration,
    pub event_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub binary: String,
    pub model: String,
    pub max_turns: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Explicit web build command. When unset, `npm run build` runs if the
    /// project's package.json declares a build script.
    pub build_command: Option<Vec<String>>,
    pub build_timeout: Duration,
    pub publish_token: Option<String>,
    /// Publish CLI argv; `--token=<token>` is appended at run time.
    pub publish_command: Vec<String>,
    pub publish_url_pattern: String,
    /// Variables forwarded to the publisher as `--build-env` / `--env` pairs.
    pub app_env: HashMap<String, String>,
    pub compile_command: Vec<String>,
    pub flash_command: Vec<String>,
    pub flash_timeout: Duration,
    pub portal_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            model: "opus".to_string(),
            max_turns: 20,
            timeout: Duration::from_secs(300),
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            build_command: None,
            build_timeout: Duration::from_secs(120),
            publish_token: None,
            publish_command: vec![
                "npx".to_string(),
                "vercel".to_string(),
                "--yes".to_string(),
                "--prod".to_string(),
            ],
            publish_url_pattern: r"https://[a-zA-Z0-9-]+\.vercel\.app".to_string(),
            app_env: HashMap::new(),
            compile_command: vec![
                "python3".to_string(),
                "-m".to_string(),
                "py_compile".to_string(),
                "main.py".to_string(),
            ],
            flash_command: vec![
                "mpremote".to_string(),
                "cp".to_string(),
                "main.py".to_string(),
                ":main.py".to_string(),
            ],
            flash_timeout: Duration::from_secs(60),
            portal_timeout: Duration::from_secs(120),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            projects_dir: default_projects_dir(),
            agent: AgentConfig::default(),
            deploy: DeployConfig::default(),
            test_command: ["python3", "-m", "pytest", "tests", "-v", "--tb=short"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            test_timeout: Duration::from_secs(120),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

fn default_projects_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("elisa")
        .join("projects")
}

impl EngineConfig {
    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` but reading from an arbitrary source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("ELISA_PROJECTS_DIR").filter(|v| !v.is_empty()) {
            config.projects_dir = PathBuf::from(dir);
        }
        if let Some(bin) = lookup("ELISA_AGENT_BIN").filter(|v| !v.is_empty()) {
            config.agent.binary = bin;
        }
        if let Some(model) = lookup("ELISA_AGENT_MODEL").filter(|v| !v.is_empty()) {
            config.agent.model = model;
        }
        if let Some(secs) = lookup("ELISA_BUILD_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.deploy.build_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = lookup("ELISA_FLASH_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.deploy.flash_timeout = Duration::from_secs(secs);
        }
        config.deploy.publish_token = lookup("VERCEL_TOKEN").filter(|v| !v.is_empty());

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.agent.timeout, Duration::from_secs(300));
        assert_eq!(config.deploy.build_timeout, Duration::from_secs(120));
        assert_eq!(config.deploy.flash_timeout, Duration::from_secs(60));
        assert_eq!(config.event_capacity, 1024);
        assert!(config.deploy.publish_token.is_none());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ELISA_PROJECTS_DIR", "/tmp/elisa-test"),
            ("ELISA_AGENT_BIN", "/opt/claude"),
            ("ELISA_BUILD_TIMEOUT_SECS", "5"),
            ("ELISA_FLASH_TIMEOUT_SECS", "not-a-number"),
            ("VERCEL_TOKEN", "tok"),
        ]
        .into_iter()
        .collect();

        let config = EngineConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.projects_dir, PathBuf::from("/tmp/elisa-test"));
        assert_eq!(config.agent.binary, "/opt/claude");
        assert_eq!(config.deploy.build_timeout, Duration::from_secs(5));
        assert_eq!(config.deploy.flash_timeout, Duration::from_secs(60));
        assert_eq!(config.deploy.publish_token.as_deref(), Some("tok"));
    }
}
