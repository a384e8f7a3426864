//! The workflow executor.
//!
//! One `execute` call drives one run: build the execution context from
//! the firing event, compute the wave plan, then walk the waves,
//! invoking each wave's steps concurrently and persisting the run
//! record after every transition. Step failures are captured as step
//! state and stop later waves; nothing escapes as an error, so the
//! code path that triggered the workflow always observes a successful
//! dispatch.

use crate::condition;
use crate::context::{ExecutionContext, StepSnapshot};
use crate::definition::{Step, Workflow};
use crate::expression;
use crate::invoker::{HandlerRegistry, RequestContext, StepOutcome, invoke_step};
use crate::matcher::TriggerEvent;
use crate::plan;
use crate::run::WorkflowRun;
use crate::store::RunStore;
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Configuration for the executor.
///
/// Threaded explicitly into [`Executor::new`]; the executor holds no
/// process-wide mutable state.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum nesting depth accepted when resolving input templates.
    pub max_expression_depth: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_expression_depth: expression::DEFAULT_MAX_DEPTH,
        }
    }
}

/// External cancellation for an in-flight run.
///
/// Cancellation is checked between waves; it never interrupts an
/// in-flight handler, since side effects such as document writes or
/// emails cannot be safely aborted mid-flight.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates a fresh, unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Executes workflows against a handler registry and run store.
pub struct Executor<S: RunStore> {
    registry: HandlerRegistry,
    store: S,
    config: ExecutorConfig,
}

impl<S: RunStore> Executor<S> {
    /// Creates an executor.
    pub fn new(registry: HandlerRegistry, store: S, config: ExecutorConfig) -> Self {
        Self {
            registry,
            store,
            config,
        }
    }

    /// Returns the run store, for inspecting history.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Executes one run of `workflow` for the firing event.
    ///
    /// Infallible by design: graph errors, step failures, and
    /// persistence trouble are all recorded on the returned run.
    pub async fn execute(&self, workflow: &Workflow, event: &TriggerEvent) -> WorkflowRun {
        self.execute_with_cancel(workflow, event, CancelFlag::new())
            .await
    }

    /// Executes one run with an external cancellation flag.
    pub async fn execute_with_cancel(
        &self,
        workflow: &Workflow,
        event: &TriggerEvent,
        cancel: CancelFlag,
    ) -> WorkflowRun {
        let mut run = WorkflowRun::new(workflow, event.describe());
        debug!(workflow = %workflow.id, run = %run.id, "starting workflow run");
        self.persist_create(&run).await;

        run.start();
        self.persist_update(&run).await;

        let plan = match plan::plan(&workflow.steps) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(workflow = %workflow.id, error = %e, "invalid step graph, failing run");
                run.fail(e.to_string());
                self.persist_update(&run).await;
                return run;
            }
        };

        let request = Arc::new(RequestContext {
            run_id: run.id,
            workflow_id: workflow.id,
            triggered_by: run.triggered_by.clone(),
        });
        let mut context = ExecutionContext::new(event.context_value());

        for wave in plan.waves() {
            if cancel.is_cancelled() {
                debug!(run = %run.id, "cancellation requested, stopping before next wave");
                run.cancel();
                self.persist_update(&run).await;
                return run;
            }

            // Condition checks and running-state transitions happen
            // up front, in declaration order.
            let mut runnable: Vec<&Step> = Vec::new();
            for name in wave {
                let Some(step) = workflow.step(name) else {
                    continue;
                };
                if !condition::evaluate_or_skip(step.condition.as_deref(), &context) {
                    debug!(run = %run.id, step = name.as_str(), "condition not met, skipping step");
                    if let Some(result) = run.step_mut(name) {
                        result.skip();
                    }
                    context.record_step(name.clone(), StepSnapshot::skipped());
                    continue;
                }
                if let Some(result) = run.step_mut(name) {
                    result.start();
                }
                runnable.push(step);
            }
            self.persist_update(&run).await;

            // The whole wave runs concurrently; siblings finish even
            // when one of them fails.
            let outcomes = join_all(runnable.iter().map(|step| {
                let context = &context;
                let request = &request;
                async move {
                    let outcome = invoke_step(
                        step,
                        context,
                        &self.registry,
                        request,
                        self.config.max_expression_depth,
                    )
                    .await;
                    (step.name.as_str(), outcome)
                }
            }))
            .await;

            let mut wave_failed = false;
            for (name, outcome) in outcomes {
                match outcome {
                    StepOutcome::Succeeded { output, attempts } => {
                        if let Some(result) = run.step_mut(name) {
                            result.succeed(output.clone(), attempts);
                        }
                        context.record_step(name.to_string(), StepSnapshot::succeeded(output));
                    }
                    StepOutcome::Failed { error, attempts } => {
                        warn!(run = %run.id, step = name, error = %error, "step failed terminally");
                        if let Some(result) = run.step_mut(name) {
                            result.fail(error.clone(), attempts);
                        }
                        context.record_step(name.to_string(), StepSnapshot::failed(error));
                        wave_failed = true;
                    }
                }
            }
            self.persist_update(&run).await;

            if wave_failed {
                break;
            }
        }

        run.finalize();
        self.persist_update(&run).await;
        debug!(run = %run.id, status = ?run.status, "workflow run finished");
        run
    }

    /// Persists a new run record, retrying once and then degrading to
    /// best-effort: losing observability is preferable to losing side
    /// effects already committed by steps.
    async fn persist_create(&self, run: &WorkflowRun) {
        if let Err(first) = self.store.create_run(run).await {
            warn!(run = %run.id, error = %first, "persisting run failed, retrying once");
            if let Err(second) = self.store.create_run(run).await {
                warn!(run = %run.id, error = %second, "persisting run failed again, run history may be incomplete");
            }
        }
    }

    /// Persists the run's current state with the same retry-once,
    /// then-degrade policy as [`Self::persist_create`].
    async fn persist_update(&self, run: &WorkflowRun) {
        if let Err(first) = self.store.update_run(run).await {
            warn!(run = %run.id, error = %first, "persisting run update failed, retrying once");
            if let Err(second) = self.store.update_run(run).await {
                warn!(run = %run.id, error = %second, "persisting run update failed again, run history may be incomplete");
            }
        }
    }
}
