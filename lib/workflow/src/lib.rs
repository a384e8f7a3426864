//! Workflow automation engine for the vellum platform.
//!
//! Workflows are declarative definitions: a set of triggers that say
//! when to run, and a set of typed steps forming a dependency graph
//! that says what to do. This crate provides:
//!
//! - **Definitions**: workflows, steps, and triggers ([`definition`],
//!   [`trigger`])
//! - **Planning**: cycle-free wave scheduling over the step graph
//!   ([`plan`])
//! - **Expressions**: `{{ path }}` templates resolved against run
//!   state ([`expression`], [`context`])
//! - **Conditions**: the boolean mini-language gating triggers and
//!   steps ([`condition`])
//! - **Execution**: the step invoker with retry/timeout handling and
//!   the wave-driving executor ([`invoker`], [`executor`])
//! - **Runs**: persisted run records behind the [`store::RunStore`]
//!   trait ([`run`], [`store`])
//! - **Dispatch**: matching platform events to workflows ([`matcher`])

pub mod condition;
pub mod context;
pub mod definition;
pub mod error;
pub mod executor;
pub mod expression;
pub mod invoker;
pub mod matcher;
pub mod plan;
pub mod run;
pub mod store;
pub mod trigger;

pub use condition::{evaluate, evaluate_or_skip};
pub use context::{ExecutionContext, StepSnapshot};
pub use definition::{Step, Workflow, WorkflowSummary};
pub use error::{ConditionError, ExpressionError, PlanError};
pub use executor::{CancelFlag, Executor, ExecutorConfig};
pub use expression::resolve;
pub use invoker::{HandlerError, HandlerRegistry, RequestContext, StepHandler, StepOutcome};
pub use matcher::{EventSource, TriggerEvent, dispatch, match_workflows};
pub use plan::ExecutionPlan;
pub use run::{RunStatus, StepResult, StepState, WorkflowRun};
pub use store::{InMemoryRunStore, RunFilter, RunStore, StoreError};
pub use trigger::{Trigger, TriggerConfig, TriggerKind};
