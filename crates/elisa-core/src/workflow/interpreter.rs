//! WorkflowInterpreter: executes a `Plan` against a scoped `Context`.
//!
//! Plans run their steps strictly in order. `invoke_subplan` recurses into
//! composite skills with the current context as parent; the recursion is
//! guarded by a per-invocation `CallStack` (cycle and depth checks) that is
//! passed down explicitly, so concurrent top-level runs never share one.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::context::{Context, ContextValue};
use super::pending::{AnswerMap, PendingRequests};
use super::schema::{Plan, SkillCatalog, Step};
use super::template::render;
use crate::agent::{discard_output, AgentExecutor, AgentRequest, OutputSink};
use crate::config::MAX_PLAN_DEPTH;
use crate::error::WorkflowError;
use crate::events::{EventChannel, Question, QuestionOption, SessionEvent};
use crate::process::truncate;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const RUN_AGENT_SYSTEM_PROMPT: &str = "You are an AI agent executing a step in a composite skill workflow. Complete the task described in the prompt.";

// ─── Call stack ─────────────────────────────────────────────────────────

/// Plan ids currently being executed by one top-level invocation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallStack {
    frames: Vec<String>,
}

impl CallStack {
    /// Push `plan_id`, rejecting re-entry and excessive depth.
    pub fn enter(&mut self, plan_id: &str) -> Result<(), WorkflowError> {
        if self.frames.iter().any(|f| f == plan_id) {
            let mut path = self.frames.clone();
            path.push(plan_id.to_string());
            return Err(WorkflowError::Cycle { path });
        }
        if self.frames.len() >= MAX_PLAN_DEPTH {
            return Err(WorkflowError::DepthExceeded {
                max: MAX_PLAN_DEPTH,
            });
        }
        self.frames.push(plan_id.to_string());
        Ok(())
    }

    pub fn exit(&mut self) {
        self.frames.pop();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[String] {
        &self.frames
    }
}

/// Pick the answer for an `ask_user` step: the value under `header` if
/// present, else the first value in key order, else the empty string.
pub fn select_answer(answers: &AnswerMap, header: &str) -> ContextValue {
    answers
        .get(header)
        .or_else(|| answers.values().next())
        .map(ContextValue::from_json)
        .unwrap_or_else(|| ContextValue::Text(String::new()))
}

// ─── Interpreter ────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct WorkflowInterpreter {
    events: EventChannel,
    catalog: Arc<SkillCatalog>,
    executor: Arc<dyn AgentExecutor>,
    answers: PendingRequests<AnswerMap>,
    working_dir: PathBuf,
    cancel: CancellationToken,
}

impl WorkflowInterpreter {
    pub fn new(
        events: EventChannel,
        catalog: Arc<SkillCatalog>,
        executor: Arc<dyn AgentExecutor>,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            events,
            catalog,
            executor,
            answers: PendingRequests::new(),
            working_dir,
            cancel: CancellationToken::new(),
        }
    }

    /// Abandon waits and agent calls once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Share an answer table with other components of the session.
    pub fn with_answers(mut self, answers: PendingRequests<AnswerMap>) -> Self {
        self.answers = answers;
        self
    }

    pub fn answers(&self) -> &PendingRequests<AnswerMap> {
        &self.answers
    }

    /// Run `plan` as a top-level invocation and return its output.
    pub async fn execute(
        &self,
        plan: &Plan,
        parent: Option<&Context<'_>>,
    ) -> Result<String, WorkflowError> {
        let mut stack = CallStack::default();
        self.execute_with_stack(plan, parent, &mut stack).await
    }

    /// Same as `execute`, with a caller-owned call stack.
    pub async fn execute_with_stack(
        &self,
        plan: &Plan,
        parent: Option<&Context<'_>>,
        stack: &mut CallStack,
    ) -> Result<String, WorkflowError> {
        self.invoke(plan, parent, stack).await
    }

    /// Resume the `ask_user` step waiting on `step_id`. Late or duplicate
    /// answers are dropped.
    pub async fn submit_answer(&self, step_id: &str, answers: AnswerMap) -> bool {
        self.answers.resolve(step_id, answers).await
    }

    fn invoke<'a>(
        &'a self,
        plan: &'a Plan,
        parent: Option<&'a Context<'a>>,
        stack: &'a mut CallStack,
    ) -> BoxFuture<'a, Result<String, WorkflowError>> {
        Box::pin(async move {
            if let Err(e) = stack.enter(&plan.id) {
                tracing::warn!("[Interpreter] Refusing to enter '{}': {}", plan.id, e);
                self.events.emit(SessionEvent::PlanFailed {
                    plan_id: plan.id.clone(),
                    message: e.to_string(),
                });
                return Err(e);
            }

            tracing::info!(
                "[Interpreter] Entering plan '{}' (depth {})",
                plan.id,
                stack.depth()
            );
            self.events.emit(SessionEvent::PlanStarted {
                plan_id: plan.id.clone(),
                plan_name: plan.name.clone(),
            });

            let mut context = Context::child(parent);
            let result = self
                .run_steps(&plan.id, &plan.steps, &mut context, stack)
                .await;
            stack.exit();

            match &result {
                Ok(output) => self.events.emit(SessionEvent::PlanCompleted {
                    plan_id: plan.id.clone(),
                    result: output.clone(),
                }),
                Err(e) => {
                    tracing::warn!("[Interpreter] Plan '{}' failed: {}", plan.id, e);
                    self.events.emit(SessionEvent::PlanFailed {
                        plan_id: plan.id.clone(),
                        message: e.to_string(),
                    });
                }
            }
            result
        })
    }

    fn run_steps<'a, 'c>(
        &'a self,
        plan_id: &'a str,
        steps: &'a [Step],
        context: &'a mut Context<'c>,
        stack: &'a mut CallStack,
    ) -> BoxFuture<'a, Result<String, WorkflowError>>
    where
        'c: 'a,
    {
        Box::pin(async move {
            let mut result = String::new();
            for step in steps {
                self.events.emit(SessionEvent::StepStarted {
                    plan_id: plan_id.to_string(),
                    step_id: step.id().to_string(),
                    step_type: step.type_name().to_string(),
                });

                match self.run_step(plan_id, step, context, stack).await {
                    Ok(Some(output)) => result = output,
                    Ok(None) => {}
                    Err(e) => {
                        self.events.emit(SessionEvent::StepFailed {
                            plan_id: plan_id.to_string(),
                            step_id: step.id().to_string(),
                            step_type: step.type_name().to_string(),
                            message: e.to_string(),
                        });
                        return Err(e);
                    }
                }

                self.events.emit(SessionEvent::StepCompleted {
                    plan_id: plan_id.to_string(),
                    step_id: step.id().to_string(),
                    step_type: step.type_name().to_string(),
                });
            }
            Ok(result)
        })
    }

    /// Execute one step. Returns the new plan result, if the step sets one.
    async fn run_step<'c>(
        &self,
        plan_id: &str,
        step: &Step,
        context: &mut Context<'c>,
        stack: &mut CallStack,
    ) -> Result<Option<String>, WorkflowError> {
        match step {
            Step::AskUser {
                id,
                question,
                header,
                options,
                store_as,
            } => {
                let questions = vec![Question {
                    question: render(question, context),
                    header: header.clone(),
                    options: options
                        .iter()
                        .map(|o| QuestionOption {
                            label: render(o, context),
                            description: String::new(),
                        })
                        .collect(),
                    multi_select: false,
                }];

                // Register before announcing so an immediate answer is not lost.
                let reply = self.answers.register(id).await;
                let key = format!("question:{}", id);
                self.events.emit_pending(
                    &key,
                    SessionEvent::QuestionRaised {
                        plan_id: plan_id.to_string(),
                        step_id: id.clone(),
                        questions,
                    },
                );

                let answers = tokio::select! {
                    answers = reply => answers.ok(),
                    _ = self.cancel.cancelled() => None,
                };
                self.events.clear_pending(&key);
                let answers = answers.ok_or(WorkflowError::Cancelled)?;
                context.set(store_as.clone(), select_answer(&answers, header));
                Ok(None)
            }

            Step::Branch {
                context_key,
                match_value,
                then_steps,
                ..
            } => {
                if context.resolve(context_key) != *match_value {
                    return Ok(None);
                }
                let output = self.run_steps(plan_id, then_steps, context, stack).await?;
                Ok((!output.is_empty()).then_some(output))
            }

            Step::InvokeSubplan {
                id,
                plan_id: target,
                store_as,
            } => {
                let skill = self
                    .catalog
                    .get(target)
                    .ok_or_else(|| WorkflowError::UnknownPlan(target.clone()))?;

                let value = match skill.to_plan() {
                    Some(child) => self.invoke(&child, Some(&*context), stack).await?,
                    None => {
                        let prompt = render(&skill.prompt, context);
                        let system_prompt =
                            format!("You are executing a skill called \"{}\".", skill.name);
                        self.call_agent(id, prompt, system_prompt, discard_output())
                            .await?
                    }
                };
                context.set(store_as.clone(), value);
                Ok(None)
            }

            Step::RunAgent {
                id,
                prompt,
                store_as,
            } => {
                let prompt = render(prompt, context);
                self.events.emit(SessionEvent::StepOutput {
                    plan_id: plan_id.to_string(),
                    step_id: id.clone(),
                    content: format!("Running agent: {}...", truncate(&prompt, 100)),
                });

                let events = self.events.clone();
                let (out_plan, out_step) = (plan_id.to_string(), id.clone());
                let sink: OutputSink = Arc::new(move |content: String| {
                    events.emit(SessionEvent::StepOutput {
                        plan_id: out_plan.clone(),
                        step_id: out_step.clone(),
                        content,
                    });
                });

                let summary = self
                    .call_agent(id, prompt, RUN_AGENT_SYSTEM_PROMPT.to_string(), sink)
                    .await?;
                context.set(store_as.clone(), summary);
                Ok(None)
            }

            Step::SetVariable { key, value, .. } => {
                let rendered = render(value, context);
                context.set(key.clone(), rendered);
                Ok(None)
            }

            Step::Output { id, template } => {
                let rendered = render(template, context);
                self.events.emit(SessionEvent::StepOutput {
                    plan_id: plan_id.to_string(),
                    step_id: id.clone(),
                    content: rendered.clone(),
                });
                Ok(Some(rendered))
            }
        }
    }

    async fn call_agent(
        &self,
        step_id: &str,
        prompt: String,
        system_prompt: String,
        on_output: OutputSink,
    ) -> Result<String, WorkflowError> {
        let request = AgentRequest {
            label: format!("skill-{}", step_id),
            prompt,
            system_prompt,
            working_dir: self.working_dir.clone(),
            on_output,
        };
        let result = tokio::select! {
            result = self.executor.execute(request) => result,
            _ = self.cancel.cancelled() => return Err(WorkflowError::Cancelled),
        };
        if result.success {
            Ok(result.summary)
        } else {
            Err(WorkflowError::Agent(result.summary))
        }
    }
}

/// Convenience for building answer maps in callers and tests.
pub fn answers<I, K>(pairs: I) -> AnswerMap
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
