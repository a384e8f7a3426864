//! Trigger matching and dispatch.
//!
//! An event produced by the host platform (a document write, a webhook
//! call, a cron tick, a manual invocation) is matched against the
//! triggers of the registered workflows; every workflow with a
//! matching, condition-passing trigger gets one run. Dispatch is
//! fire-and-forget from the host's point of view: run failures are
//! recorded on the run record and logged, never surfaced to the code
//! path that produced the event.

use crate::condition;
use crate::context::ExecutionContext;
use crate::definition::Workflow;
use crate::executor::Executor;
use crate::run::WorkflowRun;
use crate::store::RunStore;
use crate::trigger::{Trigger, TriggerConfig};
use serde_json::{Map, Value as JsonValue, json};
use tracing::{debug, warn};

/// The origin of a firing event, mirroring [`TriggerConfig`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventSource {
    /// A document operation in a collection.
    CollectionEvent {
        /// The collection identifier.
        collection: String,
        /// The operation name.
        operation: String,
    },
    /// An operation on a global document.
    GlobalEvent {
        /// The global identifier.
        global: String,
        /// The operation name.
        operation: String,
    },
    /// A call to a webhook path.
    Webhook {
        /// The called path.
        path: String,
    },
    /// A scheduler tick for a cron expression.
    Cron {
        /// The schedule whose tick fired.
        schedule: String,
    },
    /// An explicit user- or API-initiated invocation.
    Manual,
}

/// An event that may fire workflow triggers.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEvent {
    /// Where the event came from.
    pub source: EventSource,
    /// Event payload, exposed to expressions under `trigger`.
    pub payload: JsonValue,
}

impl TriggerEvent {
    /// An event for a collection operation.
    #[must_use]
    pub fn collection_event(
        collection: impl Into<String>,
        operation: impl Into<String>,
        payload: JsonValue,
    ) -> Self {
        Self {
            source: EventSource::CollectionEvent {
                collection: collection.into(),
                operation: operation.into(),
            },
            payload,
        }
    }

    /// An event for a global-document operation.
    #[must_use]
    pub fn global_event(
        global: impl Into<String>,
        operation: impl Into<String>,
        payload: JsonValue,
    ) -> Self {
        Self {
            source: EventSource::GlobalEvent {
                global: global.into(),
                operation: operation.into(),
            },
            payload,
        }
    }

    /// An event for a webhook call.
    #[must_use]
    pub fn webhook(path: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            source: EventSource::Webhook { path: path.into() },
            payload,
        }
    }

    /// An event for a cron tick.
    #[must_use]
    pub fn cron(schedule: impl Into<String>) -> Self {
        Self {
            source: EventSource::Cron {
                schedule: schedule.into(),
            },
            payload: json!({}),
        }
    }

    /// An explicit manual invocation.
    #[must_use]
    pub fn manual(payload: JsonValue) -> Self {
        Self {
            source: EventSource::Manual,
            payload,
        }
    }

    /// A short human-readable description, recorded as `triggered_by`.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.source {
            EventSource::CollectionEvent {
                collection,
                operation,
            } => format!("collection-event {collection}.{operation}"),
            EventSource::GlobalEvent { global, operation } => {
                format!("global-event {global}.{operation}")
            }
            EventSource::Webhook { path } => format!("webhook {path}"),
            EventSource::Cron { schedule } => format!("cron {schedule}"),
            EventSource::Manual => "manual".to_string(),
        }
    }

    /// The value exposed under the `trigger` root in expressions:
    /// the source descriptors plus the payload's top-level fields.
    /// A non-object payload is nested under a `payload` key instead.
    #[must_use]
    pub fn context_value(&self) -> JsonValue {
        let mut map = Map::new();
        match &self.source {
            EventSource::CollectionEvent {
                collection,
                operation,
            } => {
                map.insert("kind".to_string(), json!("collection-event"));
                map.insert("collection".to_string(), json!(collection));
                map.insert("operation".to_string(), json!(operation));
            }
            EventSource::GlobalEvent { global, operation } => {
                map.insert("kind".to_string(), json!("global-event"));
                map.insert("global".to_string(), json!(global));
                map.insert("operation".to_string(), json!(operation));
            }
            EventSource::Webhook { path } => {
                map.insert("kind".to_string(), json!("webhook"));
                map.insert("path".to_string(), json!(path));
            }
            EventSource::Cron { schedule } => {
                map.insert("kind".to_string(), json!("cron"));
                map.insert("schedule".to_string(), json!(schedule));
            }
            EventSource::Manual => {
                map.insert("kind".to_string(), json!("manual"));
            }
        }
        match &self.payload {
            JsonValue::Object(fields) => {
                for (key, value) in fields {
                    map.insert(key.clone(), value.clone());
                }
            }
            JsonValue::Null => {}
            other => {
                map.insert("payload".to_string(), other.clone());
            }
        }
        JsonValue::Object(map)
    }
}

/// Returns whether a trigger configuration matches an event source.
#[must_use]
pub fn config_matches(config: &TriggerConfig, source: &EventSource) -> bool {
    match (config, source) {
        (
            TriggerConfig::CollectionEvent {
                collection,
                operation,
            },
            EventSource::CollectionEvent {
                collection: event_collection,
                operation: event_operation,
            },
        ) => collection == event_collection && operation == event_operation,
        (
            TriggerConfig::GlobalEvent { global, operation },
            EventSource::GlobalEvent {
                global: event_global,
                operation: event_operation,
            },
        ) => global == event_global && operation == event_operation,
        (TriggerConfig::Webhook { path }, EventSource::Webhook { path: event_path }) => {
            path == event_path
        }
        (TriggerConfig::Cron { schedule }, EventSource::Cron { schedule: tick }) => {
            schedule == tick
        }
        (TriggerConfig::Manual, EventSource::Manual) => true,
        _ => false,
    }
}

/// Finds every `(workflow, trigger)` pair the event should fire.
///
/// Disabled workflows never match. A trigger with a condition only
/// matches when the condition evaluates truthy against the event; a
/// malformed condition counts as unmet. Triggers match independently:
/// a workflow with several matching triggers contributes one pair per
/// match, and each pair causes one execution.
#[must_use]
pub fn match_workflows<'a>(
    workflows: &'a [Workflow],
    event: &TriggerEvent,
) -> Vec<(&'a Workflow, &'a Trigger)> {
    let context = ExecutionContext::new(event.context_value());
    let mut matched = Vec::new();
    for workflow in workflows {
        if !workflow.is_enabled() {
            continue;
        }
        for trigger in &workflow.triggers {
            if config_matches(&trigger.config, &event.source)
                && condition::evaluate_or_skip(trigger.condition.as_deref(), &context)
            {
                matched.push((workflow, trigger));
            }
        }
    }
    matched
}

/// Matches the event against `workflows` and executes every match.
///
/// Returns the finished run records. Failed runs are logged here and
/// reflected in their records; the caller gets no error to handle.
pub async fn dispatch<S: RunStore>(
    executor: &Executor<S>,
    workflows: &[Workflow],
    event: &TriggerEvent,
) -> Vec<WorkflowRun> {
    let matched = match_workflows(workflows, event);
    debug!(
        event = %event.describe(),
        matched = matched.len(),
        "dispatching trigger event"
    );

    let mut runs = Vec::with_capacity(matched.len());
    for (workflow, trigger) in matched {
        debug!(workflow = %workflow.id, trigger = %trigger.id, "trigger fired");
        let run = executor.execute(workflow, event).await;
        if !run.status.is_terminal() || run.error.is_some() {
            warn!(
                workflow = %workflow.id,
                run = %run.id,
                error = run.error.as_deref().unwrap_or("unknown"),
                "workflow run did not complete cleanly"
            );
        }
        runs.push(run);
    }
    runs
}
