//! Run-scoped execution context.
//!
//! The context is the universe of values that expressions and
//! conditions can read from: the trigger payload plus a snapshot of
//! each settled step. It is exclusively owned and mutated by the
//! executor driving one run, with append/update semantics only.

use crate::run::StepState;
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;

/// The value roots a path may be anchored at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    /// The triggering event payload.
    Trigger,
    /// Prior step snapshots, keyed by step name.
    Steps,
}

/// One segment of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object field access.
    Field(String),
    /// Array index access.
    Index(usize),
}

/// A root-anchored dotted/bracketed path, e.g. `trigger.doc.id` or
/// `steps.fetch.output.rows[0].id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    root: Root,
    segments: Vec<Segment>,
}

impl Path {
    /// Parses a path string.
    ///
    /// Returns `None` when the input is not a well-formed path rooted
    /// at `trigger` or `steps`; callers treat such strings as literal
    /// text.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let mut segments = Vec::new();
        let mut rest = input;

        loop {
            let end = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
                .unwrap_or(rest.len());
            if end == 0 {
                return None;
            }
            segments.push(Segment::Field(rest[..end].to_string()));
            rest = &rest[end..];

            while let Some(r) = rest.strip_prefix('[') {
                let close = r.find(']')?;
                let index: usize = r[..close].trim().parse().ok()?;
                segments.push(Segment::Index(index));
                rest = &r[close + 1..];
            }

            if rest.is_empty() {
                break;
            }
            rest = rest.strip_prefix('.')?;
            if rest.is_empty() {
                return None;
            }
        }

        let root = match segments.first()? {
            Segment::Field(name) if name == "trigger" => Root::Trigger,
            Segment::Field(name) if name == "steps" => Root::Steps,
            _ => return None,
        };
        segments.remove(0);

        Some(Self { root, segments })
    }

    /// Returns the root this path is anchored at.
    #[must_use]
    pub fn root(&self) -> Root {
        self.root
    }
}

/// Snapshot of one step's settled result, as visible to later steps.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSnapshot {
    /// The step's state.
    pub state: StepState,
    /// Output, when succeeded.
    pub output: Option<JsonValue>,
    /// Error message, when failed.
    pub error: Option<String>,
}

impl StepSnapshot {
    /// Snapshot for a succeeded step.
    #[must_use]
    pub fn succeeded(output: JsonValue) -> Self {
        Self {
            state: StepState::Succeeded,
            output: Some(output),
            error: None,
        }
    }

    /// Snapshot for a failed step.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: StepState::Failed,
            output: None,
            error: Some(error.into()),
        }
    }

    /// Snapshot for a skipped step.
    #[must_use]
    pub fn skipped() -> Self {
        Self {
            state: StepState::Skipped,
            output: None,
            error: None,
        }
    }
}

/// The execution context for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    trigger: JsonValue,
    steps: HashMap<String, StepSnapshot>,
}

impl ExecutionContext {
    /// Creates a context from the triggering event's payload.
    #[must_use]
    pub fn new(trigger: JsonValue) -> Self {
        Self {
            trigger,
            steps: HashMap::new(),
        }
    }

    /// Returns the trigger payload.
    #[must_use]
    pub fn trigger(&self) -> &JsonValue {
        &self.trigger
    }

    /// Records (or updates) a step's snapshot. Entries are never
    /// removed.
    pub fn record_step(&mut self, name: impl Into<String>, snapshot: StepSnapshot) {
        self.steps.insert(name.into(), snapshot);
    }

    /// Returns a step's snapshot, if recorded.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepSnapshot> {
        self.steps.get(name)
    }

    /// Resolves a parsed path against this context.
    ///
    /// Returns `None` when any part of the path is undefined.
    #[must_use]
    pub fn resolve_path(&self, path: &Path) -> Option<JsonValue> {
        match path.root {
            Root::Trigger => navigate(&self.trigger, &path.segments).cloned(),
            Root::Steps => {
                let (first, rest) = path.segments.split_first()?;
                let Segment::Field(name) = first else {
                    return None;
                };
                let snapshot = self.steps.get(name)?;

                match rest.split_first() {
                    None => Some(json!({
                        "state": snapshot.state.as_str(),
                        "output": snapshot.output,
                        "error": snapshot.error,
                    })),
                    Some((Segment::Field(field), tail)) => match field.as_str() {
                        "state" => tail
                            .is_empty()
                            .then(|| JsonValue::String(snapshot.state.as_str().to_string())),
                        "output" => navigate(snapshot.output.as_ref()?, tail).cloned(),
                        "error" => tail
                            .is_empty()
                            .then(|| snapshot.error.clone().map(JsonValue::String))
                            .flatten(),
                        _ => None,
                    },
                    Some((Segment::Index(_), _)) => None,
                }
            }
        }
    }

    /// Parses and resolves a path string in one call.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<JsonValue> {
        self.resolve_path(&Path::parse(path)?)
    }
}

fn navigate<'a>(mut value: &'a JsonValue, segments: &[Segment]) -> Option<&'a JsonValue> {
    for segment in segments {
        value = match segment {
            Segment::Field(field) => value.as_object()?.get(field)?,
            Segment::Index(index) => value.as_array()?.get(*index)?,
        };
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_context() -> ExecutionContext {
        let mut ctx = ExecutionContext::new(json!({
            "event": "collection-event",
            "collection": "posts",
            "operation": "update",
            "doc": {
                "id": 7,
                "title": "Hello",
                "tags": ["news", "tech"],
            },
        }));
        ctx.record_step(
            "fetch",
            StepSnapshot::succeeded(json!({"rows": [{"id": 1}, {"id": 2}]})),
        );
        ctx.record_step("flaky", StepSnapshot::failed("connection reset"));
        ctx
    }

    #[test]
    fn parses_dotted_path() {
        let path = Path::parse("trigger.doc.id").expect("valid path");
        assert_eq!(path.root(), Root::Trigger);
    }

    #[test]
    fn parses_bracket_index() {
        let path = Path::parse("trigger.doc.tags[1]").expect("valid path");
        let ctx = sample_context();
        assert_eq!(ctx.resolve_path(&path), Some(json!("tech")));
    }

    #[test]
    fn rejects_unanchored_path() {
        assert!(Path::parse("doc.id").is_none());
        assert!(Path::parse("").is_none());
        assert!(Path::parse("trigger..doc").is_none());
        assert!(Path::parse("trigger.doc.").is_none());
        assert!(Path::parse("steps.a.output[x]").is_none());
    }

    #[test]
    fn looks_up_trigger_values() {
        let ctx = sample_context();
        assert_eq!(ctx.lookup("trigger.doc.id"), Some(json!(7)));
        assert_eq!(ctx.lookup("trigger.operation"), Some(json!("update")));
        assert_eq!(ctx.lookup("trigger.doc.missing"), None);
    }

    #[test]
    fn looks_up_step_output() {
        let ctx = sample_context();
        assert_eq!(
            ctx.lookup("steps.fetch.output.rows[0].id"),
            Some(json!(1))
        );
        assert_eq!(ctx.lookup("steps.fetch.state"), Some(json!("succeeded")));
        assert_eq!(
            ctx.lookup("steps.flaky.error"),
            Some(json!("connection reset"))
        );
    }

    #[test]
    fn undefined_step_is_none() {
        let ctx = sample_context();
        assert_eq!(ctx.lookup("steps.nope.output"), None);
        // Failed step has no output.
        assert_eq!(ctx.lookup("steps.flaky.output"), None);
    }

    #[test]
    fn whole_snapshot_lookup() {
        let ctx = sample_context();
        let snapshot = ctx.lookup("steps.flaky").expect("snapshot");
        assert_eq!(snapshot["state"], "failed");
        assert_eq!(snapshot["error"], "connection reset");
    }

    #[test]
    fn record_step_updates_in_place() {
        let mut ctx = sample_context();
        ctx.record_step("fetch", StepSnapshot::failed("retry later"));
        assert_eq!(ctx.step("fetch").unwrap().state, StepState::Failed);
    }
}
