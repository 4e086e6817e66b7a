//! SessionOrchestrator - lifecycle of one build session.
//!
//! ```text
//!  idle ──start──▶ planning ──plan_ready──▶ building ──all done──▶ deploying ──▶ done
//!                     │                        │                                ▲
//!                     └────────── error ───────┴──────── stop (any state) ──────┘
//! ```
//!
//! Building dispatches tasks along the dependency DAG: a task becomes
//! eligible only once every dependency is `done`, and independent tasks run
//! concurrently. After each task the orchestrator:
//!   1. Relays the agent's streamed output as `agent_output`
//!   2. Raises a human gate when the task requires approval
//!   3. Commits the project directory with git
//!   4. Runs the test suite after tester tasks
//!   5. Broadcasts token usage
//!
//! Failed tasks are never retried; the planner decides whether the session
//! continues or halts.

pub mod dag;
pub mod planner;
pub mod prompts;
pub mod test_runner;
pub mod tokens;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentExecutor, AgentRequest, AgentResult, ClaudeCliExecutor};
use crate::config::EngineConfig;
use crate::deploy::{CommandHardwareService, CommandPortalRunner, DeployPhase, HardwareService, PortalRunner};
use crate::error::{SessionError, WorkflowError};
use crate::events::{EventChannel, SessionEvent};
use crate::git::{self, CommitInfo};
use crate::models::{Agent, AgentRole, AgentStatus, ProjectSpec, Session, SessionState, Task, TaskStatus};
use crate::workflow::{AnswerMap, PendingRequests, Plan, SkillCatalog, WorkflowInterpreter};

pub use dag::TaskDag;
pub use planner::{BuildPlan, FailurePolicy, MetaPlanner, Planner, StaticPlanner};
pub use test_runner::TestOutcome;
pub use tokens::TokenTracker;

const STOPPED_MESSAGE: &str = "Build stopped by user";
const CYCLE_MESSAGE: &str = "Oops, some tasks depend on each other in a circle. The plan can't be executed.";
const BLOCKED_MESSAGE: &str = "Some tasks are blocked and cannot proceed.";

/// Reply to a human gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateResponse {
    #[serde(default = "default_approved")]
    pub approved: bool,
    #[serde(default)]
    pub feedback: String,
}

fn default_approved() -> bool {
    true
}

/// External services a session depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub planner: Arc<dyn Planner>,
    pub executor: Arc<dyn AgentExecutor>,
    pub hardware: Arc<dyn HardwareService>,
    pub portals: Arc<dyn PortalRunner>,
}

impl Collaborators {
    /// Production wiring: the agent CLI, the meta-planner and command-based
    /// hardware/portal services.
    pub fn from_config(config: &EngineConfig) -> Self {
        let executor: Arc<dyn AgentExecutor> = Arc::new(ClaudeCliExecutor::new(config.agent.clone()));
        Self {
            planner: Arc::new(MetaPlanner::new(executor.clone(), std::env::temp_dir())),
            executor,
            hardware: Arc::new(CommandHardwareService::new(&config.deploy)),
            portals: Arc::new(CommandPortalRunner::new(config.deploy.portal_timeout)),
        }
    }
}

#[derive(Default)]
struct Records {
    commits: Vec<CommitInfo>,
    test_results: Vec<TestOutcome>,
    summaries: HashMap<String, String>,
    tokens: TokenTracker,
    git_ready: bool,
}

struct Shared {
    session: RwLock<Session>,
    records: Mutex<Records>,
    events: EventChannel,
    collaborators: Collaborators,
    config: EngineConfig,
    project_dir: PathBuf,
    answers: PendingRequests<AnswerMap>,
    gates: PendingRequests<GateResponse>,
    cancel: CancellationToken,
}

/// Handle to one session. Cloning shares the session.
#[derive(Clone)]
pub struct SessionOrchestrator {
    shared: Arc<Shared>,
}

impl SessionOrchestrator {
    pub fn new(session_id: impl Into<String>, collaborators: Collaborators, config: EngineConfig) -> Self {
        let session = Session::new(session_id);
        let project_dir = config.projects_dir.join(&session.id);
        Self {
            shared: Arc::new(Shared {
                events: EventChannel::new(config.event_capacity),
                session: RwLock::new(session),
                records: Mutex::new(Records::default()),
                collaborators,
                config,
                project_dir,
                answers: PendingRequests::new(),
                gates: PendingRequests::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub async fn id(&self) -> String {
        self.shared.session.read().await.id.clone()
    }

    pub fn events(&self) -> &EventChannel {
        &self.shared.events
    }

    pub fn project_dir(&self) -> &Path {
        &self.shared.project_dir
    }

    pub async fn state(&self) -> SessionState {
        self.shared.session.read().await.state
    }

    pub async fn snapshot(&self) -> Session {
        self.shared.session.read().await.clone()
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.shared.session.read().await.tasks.clone()
    }

    pub async fn commits(&self) -> Vec<CommitInfo> {
        self.shared.records.lock().await.commits.clone()
    }

    pub async fn test_results(&self) -> Vec<TestOutcome> {
        self.shared.records.lock().await.test_results.clone()
    }

    pub async fn token_usage(&self) -> SessionEvent {
        self.shared.records.lock().await.tokens.snapshot()
    }

    // ─── Lifecycle ────────────────────────────────────────────────────────

    /// Move `idle -> planning` and run the session in the background.
    pub async fn start(&self, spec: ProjectSpec) -> Result<JoinHandle<()>, SessionError> {
        self.begin(&spec).await?;
        let this = self.clone();
        Ok(tokio::spawn(async move { this.drive(spec).await }))
    }

    /// Same as `start`, but runs to completion on the caller's task.
    pub async fn run(&self, spec: ProjectSpec) -> Result<(), SessionError> {
        self.begin(&spec).await?;
        self.drive(spec).await;
        Ok(())
    }

    async fn begin(&self, spec: &ProjectSpec) -> Result<(), SessionError> {
        let mut session = self.shared.session.write().await;
        if session.state != SessionState::Idle {
            return Err(SessionError::AlreadyStarted);
        }
        session.transition(SessionState::Planning)?;
        session.spec = Some(spec.clone());
        tracing::info!("[Orchestrator] Session {} started", session.id);
        Ok(())
    }

    async fn drive(&self, spec: ProjectSpec) {
        let outcome = tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => return,
            outcome = self.pipeline(spec) => outcome,
        };

        if let Err(e) = outcome {
            if self.shared.cancel.is_cancelled() {
                return;
            }
            tracing::error!("[Orchestrator] Session failed: {}", e);
            let message = match e {
                SessionError::CyclicTasks(_) => CYCLE_MESSAGE.to_string(),
                other => other.to_string(),
            };
            self.shared.events.emit(SessionEvent::error(message, false));
            let mut session = self.shared.session.write().await;
            if !session.state.is_terminal() {
                session.state = SessionState::Done;
            }
        }
    }

    async fn pipeline(&self, spec: ProjectSpec) -> Result<(), SessionError> {
        let events = &self.shared.events;

        // 1. Plan
        events.emit(SessionEvent::PlanningStarted);
        let plan = self.shared.collaborators.planner.plan(&spec).await?;
        let dag = TaskDag::from_tasks(&plan.tasks)?;

        {
            let mut session = self.shared.session.write().await;
            session.tasks = plan.tasks.clone();
            session.agents = plan.agents.clone();
            session.transition(SessionState::Building)?;
        }
        events.emit(SessionEvent::PlanReady {
            tasks: plan.tasks,
            agents: plan.agents,
            explanation: plan.explanation,
        });

        // 2. Build
        self.prepare_workspace().await;
        self.execute_tasks(&dag, Arc::new(spec.clone())).await;

        // 3. Deploy
        let all_done = self
            .shared
            .session
            .read()
            .await
            .tasks
            .iter()
            .all(|t| t.status == TaskStatus::Done);
        if all_done && !spec.deploy_targets().is_empty() {
            self.shared.session.write().await.transition(SessionState::Deploying)?;
            let phase = DeployPhase::new(
                events.clone(),
                self.shared.collaborators.hardware.clone(),
                self.shared.collaborators.portals.clone(),
                self.shared.config.deploy.clone(),
            );
            let session_id = self.id().await;
            phase.run(&spec, &self.shared.project_dir, &session_id).await;
        } else if !all_done && !spec.deploy_targets().is_empty() {
            tracing::info!("[Orchestrator] Skipping deploy, not every task is done");
        }

        // 4. Finish
        self.complete().await
    }

    async fn prepare_workspace(&self) {
        let dir = &self.shared.project_dir;
        for sub in [".elisa/comms", ".elisa/context", ".elisa/status", "src", "tests"] {
            if let Err(e) = tokio::fs::create_dir_all(dir.join(sub)).await {
                tracing::warn!("[Orchestrator] Failed to create {}: {}", sub, e);
            }
        }

        let repo = dir.clone();
        let ready = tokio::task::spawn_blocking(move || git::is_available() && git::init_repo(&repo).is_ok())
            .await
            .unwrap_or(false);
        if !ready {
            tracing::info!("[Orchestrator] git unavailable, commits disabled");
        }
        self.shared.records.lock().await.git_ready = ready;
    }

    async fn execute_tasks(&self, dag: &TaskDag, spec: Arc<ProjectSpec>) {
        let mut running: JoinSet<(String, AgentResult)> = JoinSet::new();
        let mut in_flight: HashSet<String> = HashSet::new();
        let mut halted = false;

        loop {
            if !halted {
                let dispatch = {
                    let mut session = self.shared.session.write().await;
                    let ready: Vec<String> = dag
                        .ready(&session.tasks)
                        .into_iter()
                        .filter(|id| !in_flight.contains(id))
                        .collect();
                    let mut dispatch = Vec::with_capacity(ready.len());
                    for task_id in ready {
                        let Some(task) = session.task_mut(&task_id) else { continue };
                        task.status = TaskStatus::InProgress;
                        let task = task.clone();
                        let agent = match session.agent_mut(&task.agent_name) {
                            Some(agent) => {
                                agent.status = AgentStatus::Working;
                                agent.clone()
                            }
                            None => Agent::new(task.agent_name.clone(), AgentRole::Builder, ""),
                        };
                        dispatch.push((task, agent));
                    }
                    dispatch
                };

                for (task, agent) in dispatch {
                    self.shared.events.emit(SessionEvent::TaskStarted {
                        task_id: task.id.clone(),
                        agent_name: agent.name.clone(),
                    });
                    in_flight.insert(task.id.clone());
                    let this = self.clone();
                    let spec = spec.clone();
                    running.spawn(async move { this.run_task(task, agent, spec).await });
                }
            }

            let Some(joined) = running.join_next().await else {
                let blocked = self
                    .shared
                    .session
                    .read()
                    .await
                    .tasks
                    .iter()
                    .any(|t| t.status == TaskStatus::Pending);
                if blocked && !halted {
                    self.shared.events.emit(SessionEvent::error(BLOCKED_MESSAGE, false));
                }
                break;
            };

            match joined {
                Ok((task_id, result)) => {
                    in_flight.remove(&task_id);
                    if result.success {
                        self.on_task_done(&task_id, result).await;
                    } else if self.on_task_failed(&task_id, result).await == FailurePolicy::Halt {
                        tracing::info!("[Orchestrator] Halting dispatch after {} failed", task_id);
                        halted = true;
                    }
                }
                Err(e) => tracing::error!("[Orchestrator] Task runner aborted: {}", e),
            }
        }
    }

    async fn run_task(&self, task: Task, agent: Agent, spec: Arc<ProjectSpec>) -> (String, AgentResult) {
        let predecessors: Vec<String> = {
            let records = self.shared.records.lock().await;
            task.dependencies
                .iter()
                .filter_map(|dep| records.summaries.get(dep).cloned())
                .collect()
        };

        let events = self.shared.events.clone();
        let (task_id, agent_name) = (task.id.clone(), agent.name.clone());
        let request = AgentRequest {
            label: task.id.clone(),
            prompt: prompts::task_prompt(&task, &spec, &predecessors),
            system_prompt: prompts::system_prompt(&agent, &task.id),
            working_dir: self.shared.project_dir.clone(),
            on_output: Arc::new(move |content: String| {
                events.emit(SessionEvent::AgentOutput {
                    task_id: task_id.clone(),
                    agent_name: agent_name.clone(),
                    content,
                })
            }),
        };

        tracing::info!("[Orchestrator] Dispatching {} to {}", task.id, agent.name);
        let mut result = self.shared.collaborators.executor.execute(request).await;

        if result.success && task.requires_approval {
            if let Some(feedback) = self.await_gate(&task, &agent, &result.summary).await {
                result.success = false;
                result.summary = feedback;
            }
        }
        (task.id, result)
    }

    /// Suspend until the gate for `task` is answered. Returns the rejection
    /// reason, or `None` when approved.
    async fn await_gate(&self, task: &Task, agent: &Agent, summary: &str) -> Option<String> {
        let rx = self.shared.gates.register(&task.id).await;
        let key = format!("gate:{}", task.id);
        self.shared.events.emit_pending(
            &key,
            SessionEvent::HumanGate {
                task_id: task.id.clone(),
                question: format!("{} finished \"{}\". Does it look good?", agent.name, task.name),
                context: summary.to_string(),
            },
        );

        let response = rx.await;
        self.shared.events.clear_pending(&key);
        match response {
            Ok(response) if response.approved => None,
            Ok(response) if response.feedback.is_empty() => {
                Some(format!("Rejected at human gate: {}", task.name))
            }
            Ok(response) => Some(response.feedback),
            Err(_) => Some(STOPPED_MESSAGE.to_string()),
        }
    }

    async fn on_task_done(&self, task_id: &str, result: AgentResult) {
        let (task, agent) = {
            let mut session = self.shared.session.write().await;
            let Some(task) = session.task_mut(task_id) else { return };
            task.status = TaskStatus::Done;
            let task = task.clone();
            let agent = session.agent_mut(&task.agent_name).map(|agent| {
                agent.status = AgentStatus::Idle;
                agent.clone()
            });
            (task, agent)
        };

        {
            let mut records = self.shared.records.lock().await;
            records.summaries.insert(task.id.clone(), result.summary.clone());
            records.tokens.add_for_agent(
                &task.agent_name,
                result.input_tokens,
                result.output_tokens,
                result.cost_usd,
            );
        }
        self.shared.events.emit(SessionEvent::TaskCompleted {
            task_id: task.id.clone(),
            summary: result.summary,
        });

        self.commit(&task).await;

        if agent.map(|a| a.role) == Some(AgentRole::Tester) {
            let results = test_runner::run_tests(
                &self.shared.config.test_command,
                &self.shared.project_dir,
                self.shared.config.test_timeout,
            )
            .await;
            for outcome in &results {
                self.shared.events.emit(outcome.to_event());
            }
            self.shared.records.lock().await.test_results.extend(results);
        }

        let usage = self.shared.records.lock().await.tokens.snapshot();
        self.shared.events.emit(usage);
    }

    async fn on_task_failed(&self, task_id: &str, result: AgentResult) -> FailurePolicy {
        let task = {
            let mut session = self.shared.session.write().await;
            let Some(task) = session.task_mut(task_id) else {
                return FailurePolicy::Continue;
            };
            task.status = TaskStatus::Failed;
            let task = task.clone();
            if let Some(agent) = session.agent_mut(&task.agent_name) {
                agent.status = AgentStatus::Error;
            }
            task
        };

        self.shared.records.lock().await.tokens.add_for_agent(
            &task.agent_name,
            result.input_tokens,
            result.output_tokens,
            result.cost_usd,
        );
        tracing::warn!("[Orchestrator] Task {} failed: {}", task.id, result.summary);
        self.shared.events.emit(SessionEvent::TaskFailed {
            task_id: task.id.clone(),
            error: result.summary,
        });
        self.shared.events.emit(SessionEvent::error(
            format!("Agent couldn't complete task: {}", task.name),
            true,
        ));
        self.shared.collaborators.planner.on_task_failed(&task)
    }

    async fn commit(&self, task: &Task) {
        if !self.shared.records.lock().await.git_ready {
            return;
        }

        let message = format!("{}: {}", task.agent_name, task.name);
        let dir = self.shared.project_dir.clone();
        let (msg, author) = (message.clone(), task.agent_name.clone());
        let committed = tokio::task::spawn_blocking(move || {
            git::commit_all(&dir, &msg, &author).map(|sha| sha.map(|sha| {
                let files = git::changed_files(&dir, &sha);
                (sha, files)
            }))
        })
        .await;

        match committed {
            Ok(Ok(Some((sha, files_changed)))) => {
                self.shared.events.emit(SessionEvent::CommitCreated {
                    sha: sha.clone(),
                    message: message.clone(),
                    agent_name: task.agent_name.clone(),
                    task_id: task.id.clone(),
                });
                self.shared.records.lock().await.commits.push(CommitInfo {
                    sha,
                    message,
                    agent_name: task.agent_name.clone(),
                    task_id: task.id.clone(),
                    timestamp: chrono::Utc::now(),
                    files_changed,
                });
            }
            Ok(Ok(None)) => tracing::debug!("[Orchestrator] Nothing to commit after {}", task.id),
            Ok(Err(e)) => tracing::warn!("[Orchestrator] Commit after {} failed: {}", task.id, e),
            Err(e) => tracing::warn!("[Orchestrator] Commit worker failed: {}", e),
        }
    }

    async fn complete(&self) -> Result<(), SessionError> {
        let summary = {
            let mut session = self.shared.session.write().await;
            if session.state == SessionState::Done {
                // Stopped while the last task was finishing.
                return Ok(());
            }
            for agent in &mut session.agents {
                if agent.status != AgentStatus::Error {
                    agent.status = AgentStatus::Done;
                }
            }
            session.transition(SessionState::Done)?;
            summarize(&session.tasks)
        };
        tracing::info!("[Orchestrator] {}", summary);
        self.shared.events.emit(SessionEvent::SessionComplete { summary });
        Ok(())
    }

    /// Cancel in-flight work and force the session to `done`. Returns false
    /// if the session had already finished.
    pub async fn stop(&self) -> bool {
        {
            let mut session = self.shared.session.write().await;
            if session.state.is_terminal() {
                return false;
            }
            session.state = SessionState::Done;
            // Cancel under the lock so a pipeline that finishes concurrently
            // already sees the token when its own transition fails.
            self.shared.cancel.cancel();
        }
        self.shared.answers.cancel_all().await;
        self.shared.gates.cancel_all().await;
        self.shared.events.clear_all_pending();
        tracing::info!("[Orchestrator] Session stopped");
        self.shared.events.emit(SessionEvent::error(STOPPED_MESSAGE, false));
        true
    }

    // ─── Out-of-band replies ──────────────────────────────────────────────

    /// Answer a human gate. Without a task id the oldest open gate is
    /// answered. Returns false when no matching gate is open.
    pub async fn respond_to_gate(&self, task_id: Option<&str>, response: GateResponse) -> bool {
        match task_id {
            Some(id) => self.shared.gates.resolve(id, response).await,
            None => self.shared.gates.resolve_oldest(response).await.is_some(),
        }
    }

    /// Resume the `ask_user` step waiting on `target_id`.
    pub async fn respond_to_question(&self, target_id: &str, answers: AnswerMap) -> bool {
        self.shared.answers.resolve(target_id, answers).await
    }

    pub async fn open_gates(&self) -> Vec<String> {
        self.shared.gates.pending_ids().await
    }

    pub async fn open_questions(&self) -> Vec<String> {
        self.shared.answers.pending_ids().await
    }

    // ─── Skill runs ───────────────────────────────────────────────────────

    /// Run a standalone skill plan against this session's event channel.
    pub async fn run_skill(&self, plan: &Plan, catalog: SkillCatalog) -> Result<String, WorkflowError> {
        if let Err(e) = tokio::fs::create_dir_all(&self.shared.project_dir).await {
            tracing::warn!("[Orchestrator] Failed to create project dir: {}", e);
        }

        let interpreter = WorkflowInterpreter::new(
            self.shared.events.clone(),
            Arc::new(catalog),
            self.shared.collaborators.executor.clone(),
            self.shared.project_dir.clone(),
        )
        .with_cancellation(self.shared.cancel.clone())
        .with_answers(self.shared.answers.clone());

        match interpreter.execute(plan, None).await {
            Ok(result) => {
                self.shared.events.emit(SessionEvent::SkillResult {
                    plan_id: plan.id.clone(),
                    result: result.clone(),
                });
                Ok(result)
            }
            Err(e) => {
                if !matches!(e, WorkflowError::Cancelled) {
                    self.shared.events.emit(SessionEvent::error(e.to_string(), false));
                }
                Err(e)
            }
        }
    }
}

/// `"Completed X/Y tasks."`, plus the failure count when any failed.
pub fn summarize(tasks: &[Task]) -> String {
    let done = tasks.iter().filter(|t| t.status == TaskStatus::Done).count();
    let failed = tasks.iter().filter(|t| t.status == TaskStatus::Failed).count();
    let mut summary = format!("Completed {}/{} tasks.", done, tasks.len());
    if failed > 0 {
        summary.push_str(&format!(" {} task(s) failed.", failed));
    }
    summary
}
