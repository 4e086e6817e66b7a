//! Per-session event channel.
//!
//! Every component of a session (orchestrator, workflow interpreter, deploy
//! phase) reports progress by emitting a `SessionEvent` on the session's
//! `EventChannel`. The channel fans events out to any number of observers
//! (SSE streams, the CLI printer, tests) over a tokio broadcast channel.
//!
//! ```text
//! Orchestrator ─┐
//! Interpreter  ─┼──▶ EventChannel ──▶ observer 1 (SSE)
//! DeployPhase  ─┘        │       ──▶ observer 2 (CLI)
//!                        └──────▶ ... (zero observers is fine)
//! ```
//!
//! Delivery is best-effort: emitting with no observers, or to an observer
//! that disconnected, is never an error for the producer. Each observer
//! receives events in emission order.
//!
//! Requests still awaiting a reply (`question_raised`, `human_gate`) are
//! emitted with `emit_pending` and replayed to observers that subscribe
//! later through `subscribe_with_replay`, until `clear_pending` retires them.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::DEFAULT_EVENT_CAPACITY;
use crate::models::{Agent, ChecklistRule, DeployTarget, Task};

/// One question shown to the user by an `ask_user` step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub question: String,
    pub header: String,
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub multi_select: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionOption {
    pub label: String,
    #[serde(default)]
    pub description: String,
}

/// Token totals for one agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentTokens {
    pub input: u64,
    pub output: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    // ─── Build session ───────────────────────────────────────────────
    PlanningStarted,
    PlanReady {
        tasks: Vec<Task>,
        agents: Vec<Agent>,
        #[serde(default)]
        explanation: String,
    },
    TaskStarted {
        task_id: String,
        agent_name: String,
    },
    TaskCompleted {
        task_id: String,
        #[serde(default)]
        summary: String,
    },
    TaskFailed {
        task_id: String,
        #[serde(default)]
        error: String,
    },
    AgentOutput {
        task_id: String,
        agent_name: String,
        content: String,
    },
    HumanGate {
        task_id: String,
        question: String,
        context: String,
    },
    CommitCreated {
        sha: String,
        message: String,
        agent_name: String,
        task_id: String,
    },
    TestResult {
        test_name: String,
        passed: bool,
        details: String,
    },
    TokenUsage {
        input_tokens: u64,
        output_tokens: u64,
        total: u64,
        cost_usd: f64,
        per_agent: BTreeMap<String, AgentTokens>,
    },

    // ─── Workflow interpreter ────────────────────────────────────────
    PlanStarted {
        plan_id: String,
        plan_name: String,
    },
    PlanCompleted {
        plan_id: String,
        result: String,
    },
    PlanFailed {
        plan_id: String,
        message: String,
    },
    StepStarted {
        plan_id: String,
        step_id: String,
        step_type: String,
    },
    StepCompleted {
        plan_id: String,
        step_id: String,
        step_type: String,
    },
    StepFailed {
        plan_id: String,
        step_id: String,
        step_type: String,
        #[serde(default)]
        message: String,
    },
    QuestionRaised {
        plan_id: String,
        step_id: String,
        questions: Vec<Question>,
    },
    StepOutput {
        plan_id: String,
        step_id: String,
        content: String,
    },
    SkillResult {
        plan_id: String,
        result: String,
    },

    // ─── Deploy ──────────────────────────────────────────────────────
    DeployStarted {
        target: DeployTarget,
    },
    DeployChecklist {
        rules: Vec<ChecklistRule>,
    },
    DeployProgress {
        step: String,
        percent: u8,
    },
    DeployComplete {
        target: DeployTarget,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },

    // ─── Terminal ────────────────────────────────────────────────────
    Error {
        message: String,
        recoverable: bool,
    },
    SessionComplete {
        summary: String,
    },
}

impl SessionEvent {
    pub fn error(message: impl Into<String>, recoverable: bool) -> Self {
        Self::Error {
            message: message.into(),
            recoverable,
        }
    }

    pub fn progress(step: impl Into<String>, percent: u8) -> Self {
        Self::DeployProgress {
            step: step.into(),
            percent,
        }
    }

    /// The wire `type` tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlanningStarted => "planning_started",
            Self::PlanReady { .. } => "plan_ready",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::AgentOutput { .. } => "agent_output",
            Self::HumanGate { .. } => "human_gate",
            Self::CommitCreated { .. } => "commit_created",
            Self::TestResult { .. } => "test_result",
            Self::TokenUsage { .. } => "token_usage",
            Self::PlanStarted { .. } => "plan_started",
            Self::PlanCompleted { .. } => "plan_completed",
            Self::PlanFailed { .. } => "plan_failed",
            Self::StepStarted { .. } => "step_started",
            Self::StepCompleted { .. } => "step_completed",
            Self::StepFailed { .. } => "step_failed",
            Self::QuestionRaised { .. } => "question_raised",
            Self::StepOutput { .. } => "step_output",
            Self::SkillResult { .. } => "skill_result",
            Self::DeployStarted { .. } => "deploy_started",
            Self::DeployChecklist { .. } => "deploy_checklist",
            Self::DeployProgress { .. } => "deploy_progress",
            Self::DeployComplete { .. } => "deploy_complete",
            Self::Error { .. } => "error",
            Self::SessionComplete { .. } => "session_complete",
        }
    }
}

/// Fan-out channel for one session's events. Cloning is cheap; all clones
/// feed the same observers.
#[derive(Debug, Clone)]
pub struct EventChannel {
    tx: broadcast::Sender<SessionEvent>,
    // Unanswered request announcements, keyed by request id, oldest first.
    pending: Arc<Mutex<Vec<(String, SessionEvent)>>>,
}

impl EventChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<(String, SessionEvent)>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deliver an event to all current observers.
    pub fn emit(&self, event: SessionEvent) {
        tracing::trace!("[EventChannel] {}", event.kind());
        // No observers is not an error.
        let _ = self.tx.send(event);
    }

    /// Deliver a request announcement and keep it for late observers until
    /// `clear_pending(key)`.
    pub fn emit_pending(&self, key: &str, event: SessionEvent) {
        let mut pending = self.lock_pending();
        pending.retain(|(existing, _)| existing != key);
        pending.push((key.to_string(), event.clone()));
        // Sent under the lock so a concurrent `subscribe_with_replay` sees
        // the event exactly once.
        self.emit(event);
    }

    pub fn clear_pending(&self, key: &str) {
        self.lock_pending().retain(|(existing, _)| existing != key);
    }

    /// Retire every announcement, e.g. when the session is stopped.
    pub fn clear_all_pending(&self) {
        self.lock_pending().clear();
    }

    /// Announcements of requests that are still open, oldest first.
    pub fn pending_events(&self) -> Vec<SessionEvent> {
        self.lock_pending().iter().map(|(_, event)| event.clone()).collect()
    }

    /// Register a new observer. It sees events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Register a new observer together with the announcements of requests
    /// raised before it subscribed and still open.
    pub fn subscribe_with_replay(&self) -> (Vec<SessionEvent>, broadcast::Receiver<SessionEvent>) {
        let pending = self.lock_pending();
        let rx = self.tx.subscribe();
        (pending.iter().map(|(_, event)| event.clone()).collect(), rx)
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_observers_is_ok() {
        let channel = EventChannel::new(4);
        channel.emit(SessionEvent::PlanningStarted);
        assert_eq!(channel.observer_count(), 0);
    }

    #[tokio::test]
    async fn test_observers_receive_in_order() {
        let channel = EventChannel::default();
        let mut a = channel.subscribe();
        let mut b = channel.clone().subscribe();

        channel.emit(SessionEvent::progress("one", 10));
        channel.emit(SessionEvent::progress("two", 20));

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.unwrap(), SessionEvent::progress("one", 10));
            assert_eq!(rx.recv().await.unwrap(), SessionEvent::progress("two", 20));
        }
    }

    #[tokio::test]
    async fn test_late_observer_gets_open_requests() {
        let channel = EventChannel::default();
        let gate = |task_id: &str| SessionEvent::HumanGate {
            task_id: task_id.into(),
            question: "Looks good?".into(),
            context: String::new(),
        };
        channel.emit(SessionEvent::PlanningStarted);
        channel.emit_pending("gate:a", gate("a"));
        channel.emit_pending("gate:b", gate("b"));
        channel.clear_pending("gate:a");

        let (replay, mut rx) = channel.subscribe_with_replay();
        assert_eq!(replay, vec![gate("b")]);

        channel.emit_pending("gate:c", gate("c"));
        assert_eq!(rx.recv().await.unwrap(), gate("c"));
        assert_eq!(channel.pending_events(), vec![gate("b"), gate("c")]);

        channel.clear_pending("gate:b");
        channel.clear_pending("gate:c");
        assert!(channel.subscribe_with_replay().0.is_empty());
    }

    #[test]
    fn test_wire_format() {
        let event = SessionEvent::DeployComplete {
            target: DeployTarget::Web,
            url: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, serde_json::json!({"type": "deploy_complete", "target": "web"}));

        let question = SessionEvent::QuestionRaised {
            plan_id: "p".into(),
            step_id: "s".into(),
            questions: vec![Question {
                question: "Pick".into(),
                header: "color".into(),
                options: vec![],
                multi_select: false,
            }],
        };
        let json = serde_json::to_value(&question).unwrap();
        assert_eq!(json["type"], "question_raised");
        assert_eq!(json["questions"][0]["multiSelect"], false);
        assert_eq!(question.kind(), "question_raised");
    }
}
