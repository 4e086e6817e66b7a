//! Child-process environment for agent, build and flash subprocesses.
//!
//! Build, publish and flash subprocesses never inherit the engine's secrets:
//! `safe_env()` produces a filtered copy of the current environment with
//! credential variables removed and `PATH` widened to the user's tool
//! directories. The agent CLI gets `agent_env()`, which adds back only the
//! Anthropic credentials it authenticates with. The process environment
//! itself is never mutated.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static FULL_PATH: OnceLock<String> = OnceLock::new();

#[cfg(windows)]
const PATH_SEP: char = ';';
#[cfg(not(windows))]
const PATH_SEP: char = ':';

/// Variables that are always stripped from child environments.
const SECRET_VARS: &[&str] = &["ANTHROPIC_API_KEY", "ANTHROPIC_AUTH_TOKEN", "VERCEL_TOKEN"];

/// Whether a variable name looks like a credential.
pub fn is_secret(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    SECRET_VARS.contains(&upper.as_str()) || upper.ends_with("_SECRET") || upper.ends_with("_TOKEN")
}

/// PATH for child processes: the current PATH plus well-known tool dirs.
/// Cached after the first call.
pub fn full_path() -> &'static str {
    FULL_PATH.get_or_init(resolve_full_path)
}

fn resolve_full_path() -> String {
    let current = std::env::var("PATH").unwrap_or_default();
    let home = dirs::home_dir().unwrap_or_default();

    let mut seen = std::collections::HashSet::new();
    let mut parts: Vec<String> = Vec::new();

    for p in current.split(PATH_SEP) {
        if !p.is_empty() && seen.insert(p.to_string()) {
            parts.push(p.to_string());
        }
    }
    for dir in tool_dirs(&home) {
        let d = dir.to_string_lossy().to_string();
        if dir.is_dir() && seen.insert(d.clone()) {
            parts.push(d);
        }
    }

    tracing::debug!("[shell_env] Resolved PATH ({} entries)", parts.len());
    parts.join(&PATH_SEP.to_string())
}

/// Directories where node, python and board tooling usually live.
fn tool_dirs(home: &Path) -> Vec<PathBuf> {
    let mut dirs = vec![
        home.join(".local").join("bin"),
        home.join(".npm-global").join("bin"),
        home.join(".claude").join("local"),
        home.join("bin"),
    ];

    #[cfg(not(windows))]
    {
        dirs.push(PathBuf::from("/usr/local/bin"));
        dirs.push(PathBuf::from("/opt/homebrew/bin"));
    }

    dirs
}

/// The current environment minus secrets, with the widened PATH.
pub fn safe_env() -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars()
        .filter(|(key, _)| !is_secret(key))
        .collect();
    env.insert("PATH".to_string(), full_path().to_string());
    env
}

/// Credentials the agent CLI needs to authenticate. Only the agent
/// executor receives them; build, publish and flash children never do.
const AGENT_CREDENTIAL_VARS: &[&str] = &["ANTHROPIC_API_KEY", "ANTHROPIC_AUTH_TOKEN"];

/// `safe_env()` plus the agent's own credentials.
pub fn agent_env() -> HashMap<String, String> {
    with_agent_credentials(safe_env(), std::env::vars())
}

fn with_agent_credentials(
    mut env: HashMap<String, String>,
    vars: impl IntoIterator<Item = (String, String)>,
) -> HashMap<String, String> {
    env.extend(
        vars.into_iter()
            .filter(|(key, _)| AGENT_CREDENTIAL_VARS.contains(&key.as_str())),
    );
    env
}

/// Locate an executable on the widened PATH.
pub fn which(cmd: &str) -> Option<String> {
    if cmd.contains(std::path::MAIN_SEPARATOR) {
        return Path::new(cmd)
            .is_file()
            .then(|| cmd.to_string());
    }
    for dir in full_path().split(PATH_SEP) {
        let candidate = Path::new(dir).join(cmd);
        if candidate.is_file() {
            return Some(candidate.to_string_lossy().to_string());
        }
        #[cfg(windows)]
        for ext in ["exe", "cmd", "bat"] {
            let with_ext = candidate.with_extension(ext);
            if with_ext.is_file() {
                return Some(with_ext.to_string_lossy().to_string());
            }
        }
    }
    None
}
