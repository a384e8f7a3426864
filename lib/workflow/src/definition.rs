//! Workflow definition types.
//!
//! A workflow is an authored automation consisting of triggers and a
//! dependency graph of steps. Definitions are read-only to the
//! executor; the authoring layer owns creation and editing.

use crate::error::PlanError;
use crate::plan;
use crate::trigger::Trigger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use vellum_core::WorkflowId;

/// A single unit of work within a workflow.
///
/// The input template is an arbitrary JSON value whose string leaves
/// may carry `{{ ... }}` expressions, resolved against the execution
/// context just before the step runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Name, unique within the workflow.
    pub name: String,
    /// Step-type identifier, resolved to a registered handler at run time.
    pub step_type: String,
    /// Input template passed to the handler after expression resolution.
    #[serde(default)]
    pub input: JsonValue,
    /// Names of steps that must succeed before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Optional condition; unmet conditions record the step as skipped.
    #[serde(default)]
    pub condition: Option<String>,
    /// Number of retries after a failed attempt.
    #[serde(default)]
    pub max_retries: u32,
    /// Linear delay between attempts, in milliseconds.
    #[serde(default)]
    pub retry_delay_ms: u64,
    /// Per-attempt timeout, in milliseconds. No timeout when absent.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Step {
    /// Creates a step with no input, dependencies, or policy.
    #[must_use]
    pub fn new(name: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            step_type: step_type.into(),
            input: JsonValue::Null,
            depends_on: Vec::new(),
            condition: None,
            max_retries: 0,
            retry_delay_ms: 0,
            timeout_ms: None,
        }
    }

    /// Sets the input template.
    #[must_use]
    pub fn with_input(mut self, input: JsonValue) -> Self {
        self.input = input;
        self
    }

    /// Adds a dependency on another step by name.
    #[must_use]
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    /// Sets the condition expression.
    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the delay between retry attempts.
    #[must_use]
    pub fn with_retry_delay_ms(mut self, retry_delay_ms: u64) -> Self {
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier for this workflow.
    pub id: WorkflowId,
    /// Human-readable name.
    pub name: String,
    /// Description of what this workflow does.
    pub description: Option<String>,
    /// Whether this workflow is eligible for triggering.
    pub enabled: bool,
    /// Triggers that start this workflow; any one match fires it.
    pub triggers: Vec<Trigger>,
    /// Steps, in declaration order.
    pub steps: Vec<Step>,
    /// When this workflow was created.
    pub created_at: DateTime<Utc>,
    /// When this workflow was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Creates an empty, enabled workflow with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            name: name.into(),
            description: None,
            enabled: true,
            triggers: Vec::new(),
            steps: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a trigger.
    #[must_use]
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// Adds a step.
    #[must_use]
    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Looks up a step by name.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Returns whether the workflow is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enables the workflow.
    pub fn enable(&mut self) {
        self.enabled = true;
        self.touch();
    }

    /// Disables the workflow.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.touch();
    }

    /// Validates the step graph: unique names, no dangling
    /// dependencies, no cycles.
    ///
    /// # Errors
    ///
    /// Returns the first [`PlanError`] found.
    pub fn validate(&self) -> Result<(), PlanError> {
        plan::plan(&self.steps).map(|_| ())
    }

    /// Marks the workflow as updated (bumps `updated_at`).
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Summary information about a workflow (for listings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    /// Workflow ID.
    pub id: WorkflowId,
    /// Workflow name.
    pub name: String,
    /// Description, if any.
    pub description: Option<String>,
    /// Whether enabled.
    pub enabled: bool,
    /// Number of triggers.
    pub trigger_count: usize,
    /// Number of steps.
    pub step_count: usize,
    /// Last updated timestamp.
    pub updated_at: DateTime<Utc>,
}

impl From<&Workflow> for WorkflowSummary {
    fn from(workflow: &Workflow) -> Self {
        Self {
            id: workflow.id,
            name: workflow.name.clone(),
            description: workflow.description.clone(),
            enabled: workflow.enabled,
            trigger_count: workflow.triggers.len(),
            step_count: workflow.steps.len(),
            updated_at: workflow.updated_at,
        }
    }
}
