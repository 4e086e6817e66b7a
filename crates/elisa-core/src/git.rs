//! Git utilities for the per-session project repository: init, commit
//! after each task, and repo inspection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;

/// Committer email used for agent commits.
const AGENT_EMAIL: &str = "agents@elisa.local";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub agent_name: String,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub files_changed: Vec<String>,
}

pub fn is_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Whether `repo_path` is the root of its own repository. A directory that
/// merely sits inside another work tree is not.
pub fn is_repo(repo_path: &Path) -> bool {
    repo_path.join(".git").exists()
}

pub fn init_repo(repo_path: &Path) -> Result<(), String> {
    if is_repo(repo_path) {
        return Ok(());
    }
    let output = Command::new("git")
        .args(["init", "-q"])
        .current_dir(repo_path)
        .output()
        .map_err(|e| e.to_string())?;
    if output.status.success() {
        Ok(())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).to_string())
    }
}

/// Stage everything and commit as `author`. Returns `Ok(None)` when the
/// tree is clean.
pub fn commit_all(repo_path: &Path, message: &str, author: &str) -> Result<Option<String>, String> {
    let add = Command::new("git")
        .args(["add", "-A"])
        .current_dir(repo_path)
        .output()
        .map_err(|e| e.to_string())?;
    if !add.status.success() {
        return Err(String::from_utf8_lossy(&add.stderr).to_string());
    }

    if !has_staged_changes(repo_path) {
        return Ok(None);
    }

    let output = Command::new("git")
        .arg("-c")
        .arg(format!("user.name={}", author))
        .arg("-c")
        .arg(format!("user.email={}", AGENT_EMAIL))
        .args(["commit", "-q", "--no-verify", "-m", message])
        .current_dir(repo_path)
        .output()
        .map_err(|e| e.to_string())?;
    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).to_string());
    }

    head_sha(repo_path)
        .map(Some)
        .ok_or_else(|| "commit created but HEAD could not be read".to_string())
}

fn has_staged_changes(repo_path: &Path) -> bool {
    // `diff --cached --quiet` exits 1 when there is something to commit.
    Command::new("git")
        .args(["diff", "--cached", "--quiet"])
        .current_dir(repo_path)
        .output()
        .map(|o| o.status.code() == Some(1))
        .unwrap_or(false)
        || head_sha(repo_path).is_none() && has_any_staged(repo_path)
}

fn has_any_staged(repo_path: &Path) -> bool {
    Command::new("git")
        .args(["ls-files", "--cached"])
        .current_dir(repo_path)
        .output()
        .map(|o| o.status.success() && !o.stdout.is_empty())
        .unwrap_or(false)
}

pub fn head_sha(repo_path: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_path)
        .output()
        .ok()?;
    if output.status.success() {
        let s = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if s.is_empty() { None } else { Some(s) }
    } else {
        None
    }
}

/// Files touched by `sha`.
pub fn changed_files(repo_path: &Path, sha: &str) -> Vec<String> {
    Command::new("git")
        .args(["show", "--name-only", "--pretty=format:", sha])
        .current_dir(repo_path)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| {
            String::from_utf8_lossy(&o.stdout)
                .lines()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_all_and_inspect() {
        if !is_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).unwrap();
        assert!(is_repo(dir.path()));

        // Nothing to commit in a fresh repo.
        assert_eq!(commit_all(dir.path(), "empty", "Builder Bot").unwrap(), None);

        std::fs::write(dir.path().join("main.py"), "print('hi')\n").unwrap();
        let sha = commit_all(dir.path(), "Builder Bot: Board", "Builder Bot")
            .unwrap()
            .expect("commit sha");
        assert_eq!(head_sha(dir.path()).as_deref(), Some(sha.as_str()));
        assert_eq!(changed_files(dir.path(), &sha), vec!["main.py"]);

        // Clean tree after commit.
        assert_eq!(commit_all(dir.path(), "again", "Builder Bot").unwrap(), None);
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(["-c", "user.name=User", "-c", "user.email=user@example.com"])
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap()
            .status;
        assert!(status.success(), "git {:?}", args);
    }

    #[test]
    fn test_session_dir_inside_checkout_gets_its_own_repo() {
        if !is_available() {
            return;
        }
        let outer = tempfile::tempdir().unwrap();
        git(outer.path(), &["init", "-q"]);
        std::fs::write(outer.path().join("README.md"), "outer\n").unwrap();
        git(outer.path(), &["add", "-A"]);
        git(outer.path(), &["commit", "-q", "-m", "outer"]);
        let outer_head = head_sha(outer.path()).unwrap();
        std::fs::write(outer.path().join("user_secret.txt"), "keep out\n").unwrap();

        let project = outer.path().join("projects").join("session-1");
        std::fs::create_dir_all(&project).unwrap();
        assert!(!is_repo(&project));

        init_repo(&project).unwrap();
        assert!(project.join(".git").is_dir());

        std::fs::write(project.join("main.py"), "print('hi')\n").unwrap();
        let sha = commit_all(&project, "Builder Bot: Board", "Builder Bot")
            .unwrap()
            .expect("commit sha");
        assert_eq!(changed_files(&project, &sha), vec!["main.py"]);
        assert_eq!(head_sha(outer.path()).as_deref(), Some(outer_head.as_str()));
    }

    #[test]
    fn test_plain_dir_is_not_a_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_repo(dir.path()));
    }
}
