//! Workflow engine: step-graph interpretation for skills.
//!
//! A skill is a `Plan`: an ordered list of steps that ask the user questions,
//! branch on the answers, call other skills, dispatch prompts to an agent and
//! produce a textual result.
//!
//! # Architecture
//!
//! ```text
//! skill.yaml / block workspace JSON
//!        │                    │
//!        ▼                    ▼ workspace::interpret_workspace
//!      Plan ◀──────────── SkillSpec ──▶ SkillCatalog
//!        │                                   │
//!        ▼                                   │ invoke_subplan
//! WorkflowInterpreter ◀──────────────────────┘
//!   │   │      │
//!   │   │      └──▶ dyn AgentExecutor       (run_agent, simple skills)
//!   │   └─────────▶ PendingRequests<Answers> (ask_user suspension)
//!   └─────────────▶ EventChannel            (plan_*/step_*/question_raised)
//! ```

pub mod context;
pub mod interpreter;
pub mod pending;
pub mod schema;
pub mod template;
pub mod workspace;

pub use context::{Context, ContextValue};
pub use interpreter::{answers, select_answer, CallStack, WorkflowInterpreter};
pub use pending::{AnswerMap, PendingRequests};
pub use schema::{Plan, SkillCatalog, SkillCategory, SkillSpec, Step};
pub use template::render;
pub use workspace::interpret_workspace;
