//! Step invocation: handler dispatch, timeout, and retry policy.
//!
//! The invoker is the only place a handler is ever called from. It
//! resolves the step's input template, looks the handler up by step
//! type, and drives the attempt loop: a timeout or handler error is a
//! failed attempt, retried up to the step's `max_retries` with a
//! linear `retry_delay_ms` pause. Handler panics are isolated to the
//! attempt; they never abort the run.

use crate::context::ExecutionContext;
use crate::definition::Step;
use crate::expression;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use vellum_core::{WorkflowId, WorkflowRunId};

/// Ambient context passed to every handler invocation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// The run this invocation belongs to.
    pub run_id: WorkflowRunId,
    /// The workflow being executed.
    pub workflow_id: WorkflowId,
    /// Description of the trigger that fired the run.
    pub triggered_by: String,
}

/// A handler failure with a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    /// What went wrong, as shown on the step result.
    pub message: String,
}

impl HandlerError {
    /// Creates a handler error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HandlerError {}

/// The business-logic function backing a step type.
///
/// The executor never inspects handler internals; a handler either
/// succeeds with an output value or fails with a message.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Runs the handler with the resolved input.
    async fn run(
        &self,
        input: JsonValue,
        request: Arc<RequestContext>,
    ) -> Result<JsonValue, HandlerError>;
}

/// Registry mapping step-type identifiers to handlers.
///
/// Built once at startup from statically known handlers plus any
/// externally registered ones.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a step type, replacing any previous one.
    pub fn register(&mut self, step_type: impl Into<String>, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(step_type.into(), handler);
    }

    /// Looks up the handler for a step type.
    #[must_use]
    pub fn get(&self, step_type: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(step_type).cloned()
    }

    /// Returns whether a step type is registered.
    #[must_use]
    pub fn contains(&self, step_type: &str) -> bool {
        self.handlers.contains_key(step_type)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("step_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A handler that echoes its resolved input as output.
pub struct EchoHandler;

#[async_trait]
impl StepHandler for EchoHandler {
    async fn run(
        &self,
        input: JsonValue,
        _request: Arc<RequestContext>,
    ) -> Result<JsonValue, HandlerError> {
        Ok(input)
    }
}

/// The settled outcome of one step invocation, retries included.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The step succeeded.
    Succeeded {
        /// Handler output.
        output: JsonValue,
        /// Number of handler invocations.
        attempts: u32,
    },
    /// The step failed terminally.
    Failed {
        /// The last attempt's error message.
        error: String,
        /// Number of handler invocations (zero when the handler was
        /// never invoked).
        attempts: u32,
    },
}

/// Executes one step to completion against the current context.
///
/// Never returns an error: every failure mode is captured in the
/// outcome so the executor can record it as step state.
pub async fn invoke_step(
    step: &Step,
    context: &ExecutionContext,
    registry: &HandlerRegistry,
    request: &Arc<RequestContext>,
    max_expression_depth: usize,
) -> StepOutcome {
    let input = match expression::resolve(&step.input, context, max_expression_depth) {
        Ok(input) => input,
        Err(e) => {
            return StepOutcome::Failed {
                error: format!("failed to resolve input for step '{}': {e}", step.name),
                attempts: 0,
            };
        }
    };

    let Some(handler) = registry.get(&step.step_type) else {
        return StepOutcome::Failed {
            error: format!("unknown step type '{}'", step.step_type),
            attempts: 0,
        };
    };

    let mut attempt = 0;
    loop {
        attempt += 1;
        match run_attempt(
            handler.clone(),
            input.clone(),
            request.clone(),
            step.timeout_ms,
        )
        .await
        {
            Ok(output) => {
                return StepOutcome::Succeeded {
                    output,
                    attempts: attempt,
                };
            }
            Err(error) => {
                if attempt > step.max_retries {
                    return StepOutcome::Failed {
                        error,
                        attempts: attempt,
                    };
                }
                debug!(
                    step = step.name,
                    attempt,
                    max_retries = step.max_retries,
                    error,
                    "step attempt failed, retrying"
                );
                if step.retry_delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(step.retry_delay_ms)).await;
                }
            }
        }
    }
}

/// Runs one attempt on its own task so a handler panic is converted
/// into a failed attempt instead of unwinding through the executor.
///
/// A timed-out attempt is aborted, not abandoned: the next attempt
/// must never race a still-running predecessor's side effects.
async fn run_attempt(
    handler: Arc<dyn StepHandler>,
    input: JsonValue,
    request: Arc<RequestContext>,
    timeout_ms: Option<u64>,
) -> Result<JsonValue, String> {
    let mut task = tokio::spawn(async move { handler.run(input, request).await });

    let joined = match timeout_ms {
        Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                task.abort();
                return Err(format!("step timed out after {ms}ms"));
            }
        },
        None => task.await,
    };

    match joined {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(e.message),
        Err(join_error) => Err(format!("handler panicked: {join_error}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StepSnapshot;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn request() -> Arc<RequestContext> {
        Arc::new(RequestContext {
            run_id: WorkflowRunId::new(),
            workflow_id: WorkflowId::new(),
            triggered_by: "manual".to_string(),
        })
    }

    fn echo_registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", Arc::new(EchoHandler));
        registry
    }

    /// Fails the first `failures` invocations, then succeeds.
    struct FlakyHandler {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl StepHandler for FlakyHandler {
        async fn run(
            &self,
            _input: JsonValue,
            _request: Arc<RequestContext>,
        ) -> Result<JsonValue, HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(HandlerError::new(format!("transient failure {call}")))
            } else {
                Ok(json!({"recovered": true}))
            }
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl StepHandler for PanickingHandler {
        async fn run(
            &self,
            _input: JsonValue,
            _request: Arc<RequestContext>,
        ) -> Result<JsonValue, HandlerError> {
            panic!("handler bug");
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl StepHandler for SlowHandler {
        async fn run(
            &self,
            _input: JsonValue,
            _request: Arc<RequestContext>,
        ) -> Result<JsonValue, HandlerError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(JsonValue::Null)
        }
    }

    #[tokio::test]
    async fn resolves_input_before_invoking() {
        let mut context = ExecutionContext::new(json!({"doc": {"id": 7}}));
        context.record_step("fetch", StepSnapshot::succeeded(json!({"id": 7})));

        let step = Step::new("notify", "echo")
            .with_input(json!({"ref": "{{ steps.fetch.output.id }}"}));
        let outcome = invoke_step(&step, &context, &echo_registry(), &request(), 50).await;

        assert_eq!(
            outcome,
            StepOutcome::Succeeded {
                output: json!({"ref": 7}),
                attempts: 1,
            }
        );
    }

    #[tokio::test]
    async fn unknown_step_type_fails_without_retry() {
        let context = ExecutionContext::new(JsonValue::Null);
        let step = Step::new("notify", "no-such-type").with_max_retries(5);
        let outcome = invoke_step(&step, &context, &echo_registry(), &request(), 50).await;

        match outcome {
            StepOutcome::Failed { error, attempts } => {
                assert!(error.contains("unknown step type 'no-such-type'"));
                assert_eq!(attempts, 0);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retries_up_to_limit_with_linear_delay() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            "flaky",
            Arc::new(FlakyHandler {
                failures: u32::MAX,
                calls: AtomicU32::new(0),
            }),
        );

        let step = Step::new("c", "flaky")
            .with_max_retries(2)
            .with_retry_delay_ms(100);
        let context = ExecutionContext::new(JsonValue::Null);

        let started = Instant::now();
        let outcome = invoke_step(&step, &context, &registry, &request(), 50).await;
        let elapsed = started.elapsed();

        match outcome {
            StepOutcome::Failed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected failure, got {other:?}"),
        }
        // Two retry pauses of 100ms each.
        assert!(elapsed >= Duration::from_millis(200), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            "flaky",
            Arc::new(FlakyHandler {
                failures: 2,
                calls: AtomicU32::new(0),
            }),
        );

        let step = Step::new("c", "flaky").with_max_retries(3);
        let context = ExecutionContext::new(JsonValue::Null);
        let outcome = invoke_step(&step, &context, &registry, &request(), 50).await;

        assert_eq!(
            outcome,
            StepOutcome::Succeeded {
                output: json!({"recovered": true}),
                attempts: 3,
            }
        );
    }

    #[tokio::test]
    async fn zero_retries_means_one_attempt() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            "flaky",
            Arc::new(FlakyHandler {
                failures: u32::MAX,
                calls: AtomicU32::new(0),
            }),
        );

        let step = Step::new("c", "flaky");
        let context = ExecutionContext::new(JsonValue::Null);
        let outcome = invoke_step(&step, &context, &registry, &request(), 50).await;

        match outcome {
            StepOutcome::Failed { attempts, .. } => assert_eq!(attempts, 1),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_is_a_failed_attempt() {
        let mut registry = HandlerRegistry::new();
        registry.register("slow", Arc::new(SlowHandler));

        let step = Step::new("s", "slow").with_timeout_ms(50);
        let context = ExecutionContext::new(JsonValue::Null);
        let outcome = invoke_step(&step, &context, &registry, &request(), 50).await;

        match outcome {
            StepOutcome::Failed { error, attempts } => {
                assert!(error.contains("timed out after 50ms"));
                assert_eq!(attempts, 1);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    /// Sleeps past its step's timeout, then records a side effect.
    struct SlowCommitHandler {
        commits: Arc<AtomicU32>,
    }

    #[async_trait]
    impl StepHandler for SlowCommitHandler {
        async fn run(
            &self,
            _input: JsonValue,
            _request: Arc<RequestContext>,
        ) -> Result<JsonValue, HandlerError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(JsonValue::Null)
        }
    }

    #[tokio::test]
    async fn timed_out_attempt_is_aborted_before_it_commits() {
        let commits = Arc::new(AtomicU32::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register(
            "slow-commit",
            Arc::new(SlowCommitHandler {
                commits: commits.clone(),
            }),
        );

        let step = Step::new("s", "slow-commit")
            .with_timeout_ms(20)
            .with_max_retries(1);
        let context = ExecutionContext::new(JsonValue::Null);
        let outcome = invoke_step(&step, &context, &registry, &request(), 50).await;

        match outcome {
            StepOutcome::Failed { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("expected failure, got {other:?}"),
        }

        // Give any surviving task time to reach its side effect.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(commits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panic_is_isolated_to_the_attempt() {
        let mut registry = HandlerRegistry::new();
        registry.register("buggy", Arc::new(PanickingHandler));

        let step = Step::new("b", "buggy");
        let context = ExecutionContext::new(JsonValue::Null);
        let outcome = invoke_step(&step, &context, &registry, &request(), 50).await;

        match outcome {
            StepOutcome::Failed { error, .. } => assert!(error.contains("panicked")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn depth_overflow_fails_resolution() {
        let mut deep = json!("leaf");
        for _ in 0..60 {
            deep = json!([deep]);
        }
        let step = Step::new("d", "echo").with_input(deep);
        let context = ExecutionContext::new(JsonValue::Null);
        let outcome = invoke_step(&step, &context, &echo_registry(), &request(), 50).await;

        match outcome {
            StepOutcome::Failed { error, attempts } => {
                assert!(error.contains("failed to resolve input"));
                assert_eq!(attempts, 0);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
