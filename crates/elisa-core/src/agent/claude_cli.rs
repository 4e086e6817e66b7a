//! Agent executor backed by the Claude Code CLI in `stream-json` mode.
//!
//! Each request spawns one `claude -p` child with a filtered environment,
//! reads NDJSON from stdout, forwards assistant text to the output sink and
//! takes the final `result` message as the summary.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use super::{AgentExecutor, AgentRequest, AgentResult};
use crate::config::AgentConfig;
use crate::shell_env;

// ─── Claude Protocol Types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamLine {
    #[serde(rename = "type", default)]
    msg_type: String,
    subtype: Option<String>,
    message: Option<StreamMessage>,
    result: Option<String>,
    error: Option<String>,
    cost_usd: Option<f64>,
    total_cost_usd: Option<f64>,
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// What one stdout line contributes to the run.
#[derive(Debug, PartialEq)]
pub(crate) enum StreamItem {
    Text(Vec<String>),
    Result {
        text: String,
        is_error: bool,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
    },
    Ignored,
}

pub(crate) fn parse_stream_line(line: &str) -> StreamItem {
    let line = line.trim();
    if !line.starts_with('{') {
        return StreamItem::Ignored;
    }
    let Ok(msg) = serde_json::from_str::<StreamLine>(line) else {
        return StreamItem::Ignored;
    };

    match msg.msg_type.as_str() {
        "assistant" => {
            let texts: Vec<String> = msg
                .message
                .map(|m| m.content)
                .unwrap_or_default()
                .into_iter()
                .filter(|c| c.block_type == "text")
                .filter_map(|c| c.text)
                .collect();
            if texts.is_empty() {
                StreamItem::Ignored
            } else {
                StreamItem::Text(texts)
            }
        }
        "result" => {
            let is_error = msg.subtype.as_deref() == Some("error");
            let mut text = msg.result.unwrap_or_default();
            if is_error && text.is_empty() {
                text = msg.error.unwrap_or_else(|| "Unknown error".to_string());
            }
            let (usage_in, usage_out) = msg
                .usage
                .map(|u| (u.input_tokens, u.output_tokens))
                .unwrap_or((0, 0));
            StreamItem::Result {
                text,
                is_error,
                input_tokens: msg.input_tokens.unwrap_or(usage_in),
                output_tokens: msg.output_tokens.unwrap_or(usage_out),
                cost_usd: msg.cost_usd.or(msg.total_cost_usd).unwrap_or(0.0),
            }
        }
        _ => StreamItem::Ignored,
    }
}

// ─── Executor ───────────────────────────────────────────────────────────

pub struct ClaudeCliExecutor {
    config: AgentConfig,
}

impl ClaudeCliExecutor {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    fn command(&self, request: &AgentRequest) -> Command {
        let binary =
            shell_env::which(&self.config.binary).unwrap_or_else(|| self.config.binary.clone());
        let mut cmd = Command::new(binary);
        cmd.arg("-p")
            .arg(&request.prompt)
            .args(["--output-format", "stream-json", "--verbose"])
            .arg("--append-system-prompt")
            .arg(&request.system_prompt)
            .arg("--model")
            .arg(&self.config.model)
            .args(["--permission-mode", "bypassPermissions"])
            .arg("--max-turns")
            .arg(self.config.max_turns.to_string())
            .current_dir(&request.working_dir)
            .env_clear()
            .envs(shell_env::agent_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, request: &AgentRequest) -> AgentResult {
        let mut child = match self.command(request).spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(
                    "[AgentRunner] Failed to spawn '{}': {}",
                    self.config.binary,
                    e
                );
                return AgentResult::failed(format!(
                    "Claude CLI ('{}') not found. Is it installed and on PATH?",
                    self.config.binary
                ));
            }
        };

        let Some(stdout) = child.stdout.take() else {
            return AgentResult::failed("No stdout on agent process");
        };
        let mut stderr = child.stderr.take();

        let mut accumulated: Vec<String> = Vec::new();
        let mut result = AgentResult {
            success: true,
            ..Default::default()
        };
        let mut final_text = String::new();

        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_stream_line(&line) {
                    StreamItem::Text(texts) => {
                        for text in texts {
                            (request.on_output)(text.clone());
                            accumulated.push(text);
                        }
                    }
                    StreamItem::Result {
                        text,
                        is_error,
                        input_tokens,
                        output_tokens,
                        cost_usd,
                    } => {
                        final_text = text;
                        result.success = !is_error;
                        result.input_tokens = input_tokens;
                        result.output_tokens = output_tokens;
                        result.cost_usd = cost_usd;
                    }
                    StreamItem::Ignored => {}
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("[AgentRunner] Error reading output for {}: {}", request.label, e);
                    result.success = false;
                    final_text = e.to_string();
                    break;
                }
            }
        }

        let status = child.wait().await;
        let exit_ok = status.as_ref().map(|s| s.success()).unwrap_or(false);
        if !exit_ok && result.success {
            let mut stderr_text = String::new();
            if let Some(stderr) = stderr.as_mut() {
                let _ = stderr.read_to_string(&mut stderr_text).await;
            }
            let stderr_text = stderr_text.trim().to_string();
            if !stderr_text.is_empty() {
                tracing::error!("[AgentRunner] stderr for {}: {}", request.label, stderr_text);
            }
            result.success = false;
            if final_text.is_empty() {
                final_text = if stderr_text.is_empty() {
                    match status {
                        Ok(s) => format!("Process exited with code {}", s.code().unwrap_or(-1)),
                        Err(e) => e.to_string(),
                    }
                } else {
                    stderr_text
                };
            }
        }

        result.summary = if !final_text.is_empty() {
            final_text
        } else {
            let tail = accumulated.len().saturating_sub(3);
            let joined = accumulated[tail..].join("\n");
            if joined.is_empty() {
                "No output".to_string()
            } else {
                joined
            }
        };
        result
    }
}

#[async_trait]
impl AgentExecutor for ClaudeCliExecutor {
    async fn execute(&self, request: AgentRequest) -> AgentResult {
        tracing::info!(
            "[AgentRunner] Running {} (cwd: {})",
            request.label,
            request.working_dir.display()
        );
        let timeout = self.config.timeout;
        match tokio::time::timeout(timeout, self.run(&request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    "[AgentRunner] {} timed out after {}s",
                    request.label,
                    timeout.as_secs()
                );
                AgentResult::failed(format!("Agent timed out after {} seconds", timeout.as_secs()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn test_parse_assistant_text_blocks() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hello"},{"type":"tool_use","id":"t"}]}}"#;
        assert_eq!(parse_stream_line(line), StreamItem::Text(vec!["hello".into()]));
    }

    #[test]
    fn test_parse_result_with_usage() {
        let line = r#"{"type":"result","subtype":"success","result":"done","total_cost_usd":0.5,"usage":{"input_tokens":10,"output_tokens":4}}"#;
        assert_eq!(
            parse_stream_line(line),
            StreamItem::Result {
                text: "done".into(),
                is_error: false,
                input_tokens: 10,
                output_tokens: 4,
                cost_usd: 0.5,
            }
        );
    }

    #[test]
    fn test_parse_error_result_and_noise() {
        let line = r#"{"type":"result","subtype":"error","error":"rate limited"}"#;
        match parse_stream_line(line) {
            StreamItem::Result { text, is_error, .. } => {
                assert!(is_error);
                assert_eq!(text, "rate limited");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(parse_stream_line("[DEBUG] starting"), StreamItem::Ignored);
        assert_eq!(parse_stream_line("{not json"), StreamItem::Ignored);
    }

    fn request(dir: &std::path::Path, sink: OutputCollector) -> AgentRequest {
        AgentRequest {
            label: "task-1".into(),
            prompt: "do it".into(),
            system_prompt: "be good".into(),
            working_dir: dir.to_path_buf(),
            on_output: Arc::new(move |s| sink.lock().unwrap().push(s)),
        }
    }

    type OutputCollector = Arc<Mutex<Vec<String>>>;

    #[test]
    fn test_agent_command_carries_credentials_but_not_publish_token() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ClaudeCliExecutor::new(AgentConfig::default());
        let cmd = executor.command(&request(dir.path(), Arc::default()));

        let envs: std::collections::HashMap<String, Option<String>> = cmd
            .as_std()
            .get_envs()
            .map(|(k, v)| {
                (
                    k.to_string_lossy().to_string(),
                    v.map(|v| v.to_string_lossy().to_string()),
                )
            })
            .collect();
        assert_eq!(
            envs.get("ANTHROPIC_API_KEY").cloned().flatten(),
            std::env::var("ANTHROPIC_API_KEY").ok()
        );
        assert!(envs.get("VERCEL_TOKEN").cloned().flatten().is_none());
        assert!(envs.contains_key("PATH"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_failed_result() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ClaudeCliExecutor::new(AgentConfig {
            binary: "/nonexistent/claude-binary".into(),
            ..AgentConfig::default()
        });
        let result = executor
            .execute(request(dir.path(), Arc::new(Mutex::new(Vec::new()))))
            .await;
        assert!(!result.success);
        assert!(result.summary.contains("not found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_streams_from_fake_cli() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-claude");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             echo '{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"working\"}]}}'\n\
             echo '{\"type\":\"result\",\"subtype\":\"success\",\"result\":\"all done\",\"input_tokens\":3,\"output_tokens\":2}'\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let executor = ClaudeCliExecutor::new(AgentConfig {
            binary: script.to_string_lossy().to_string(),
            timeout: Duration::from_secs(10),
            ..AgentConfig::default()
        });
        let output: OutputCollector = Arc::new(Mutex::new(Vec::new()));
        let result = executor.execute(request(dir.path(), output.clone())).await;

        assert!(result.success);
        assert_eq!(result.summary, "all done");
        assert_eq!(result.input_tokens, 3);
        assert_eq!(*output.lock().unwrap(), vec!["working".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_without_result_uses_tail_text() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-claude");
        std::fs::write(&script, "#!/bin/sh\necho 'boom' >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let executor = ClaudeCliExecutor::new(AgentConfig {
            binary: script.to_string_lossy().to_string(),
            ..AgentConfig::default()
        });
        let result = executor
            .execute(request(dir.path(), Arc::new(Mutex::new(Vec::new()))))
            .await;
        assert!(!result.success);
        assert_eq!(result.summary, "boom");
    }
}
