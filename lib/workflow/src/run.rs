//! Persisted run records and their state machines.
//!
//! A `WorkflowRun` is created at trigger-match time and updated after
//! every step transition, so an observer reading the record
//! mid-execution sees accurate partial progress. A run reaches a
//! terminal status exactly once; step results are updated in place per
//! step name (re-attempts never append new entries).

use crate::definition::Workflow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use vellum_core::{WorkflowId, WorkflowRunId};

/// The overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run record created, execution not yet started.
    Pending,
    /// Run is actively executing.
    Running,
    /// Every step succeeded (or was skipped).
    Completed,
    /// At least one step failed terminally, or a graph error occurred.
    Failed,
    /// Run was cancelled externally.
    Cancelled,
}

impl RunStatus {
    /// Returns true if this is a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// The execution state of a single step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// Step is waiting for its wave.
    Pending,
    /// Step is currently executing.
    Running,
    /// Step completed successfully.
    Succeeded,
    /// Step failed after exhausting its retries.
    Failed,
    /// Step's condition was unmet; it never ran.
    Skipped,
}

impl StepState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// The snake_case form used in the execution context.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// The recorded result of one step within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// The step name.
    pub name: String,
    /// Current state.
    pub state: StepState,
    /// Output produced on success.
    pub output: Option<JsonValue>,
    /// Error message on failure.
    pub error: Option<String>,
    /// When the first attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of handler invocations. Zero when the handler was never
    /// invoked (unknown step type, unresolvable input, skipped).
    pub attempts: u32,
}

impl StepResult {
    /// Creates a pending result for the named step.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: StepState::Pending,
            output: None,
            error: None,
            started_at: None,
            completed_at: None,
            attempts: 0,
        }
    }

    /// Marks the step as running.
    pub fn start(&mut self) {
        self.state = StepState::Running;
        self.started_at = Some(Utc::now());
    }

    /// Marks the step as succeeded.
    pub fn succeed(&mut self, output: JsonValue, attempts: u32) {
        self.state = StepState::Succeeded;
        self.output = Some(output);
        self.attempts = attempts;
        self.completed_at = Some(Utc::now());
    }

    /// Marks the step as failed.
    pub fn fail(&mut self, error: impl Into<String>, attempts: u32) {
        self.state = StepState::Failed;
        self.error = Some(error.into());
        self.attempts = attempts;
        self.completed_at = Some(Utc::now());
    }

    /// Marks the step as skipped.
    pub fn skip(&mut self) {
        self.state = StepState::Skipped;
        self.completed_at = Some(Utc::now());
    }
}

/// A record of a single workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Unique identifier for this run.
    pub id: WorkflowRunId,
    /// The workflow being executed.
    pub workflow_id: WorkflowId,
    /// Current status.
    pub status: RunStatus,
    /// When the run record was created.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Description of the trigger that fired this run.
    pub triggered_by: String,
    /// Per-step results, in declaration order.
    pub steps: Vec<StepResult>,
    /// First step failure or graph error, when the run failed.
    pub error: Option<String>,
}

impl WorkflowRun {
    /// Creates a pending run with one pending result per declared step.
    #[must_use]
    pub fn new(workflow: &Workflow, triggered_by: impl Into<String>) -> Self {
        Self {
            id: WorkflowRunId::new(),
            workflow_id: workflow.id,
            status: RunStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            triggered_by: triggered_by.into(),
            steps: workflow
                .steps
                .iter()
                .map(|s| StepResult::new(&s.name))
                .collect(),
            error: None,
        }
    }

    /// Flips the run to running.
    pub fn start(&mut self) {
        if self.status == RunStatus::Pending {
            self.status = RunStatus::Running;
        }
    }

    /// Returns the result entry for a step, if declared.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Returns a mutable result entry for a step, if declared.
    pub fn step_mut(&mut self, name: &str) -> Option<&mut StepResult> {
        self.steps.iter_mut().find(|s| s.name == name)
    }

    /// Fails the run with a run-level error (graph errors, etc.).
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    /// Cancels the run.
    pub fn cancel(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = RunStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Computes and records the terminal status from step results.
    ///
    /// Completed iff no step failed; otherwise failed, with `error`
    /// set to the first failed step's message in declaration order.
    /// Within the failing wave declaration order is the tiebreak, and
    /// a terminal failure stops later waves, so declaration order over
    /// the whole record is sufficient.
    pub fn finalize(&mut self) {
        if self.status.is_terminal() {
            return;
        }

        let first_failure = self
            .steps
            .iter()
            .find(|s| s.state == StepState::Failed)
            .and_then(|s| s.error.clone());

        match first_failure {
            Some(message) => {
                self.status = RunStatus::Failed;
                self.error = Some(message);
            }
            None => self.status = RunStatus::Completed,
        }
        self.completed_at = Some(Utc::now());
    }

    /// Returns the run duration, if terminal.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.completed_at? - self.started_at)
    }
}
