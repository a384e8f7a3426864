//! Error types for the workflow crate.
//!
//! Errors are split by the phase that produces them:
//! - `PlanError`: dependency-graph analysis, before any step runs
//! - `ExpressionError`: input-template resolution
//! - `ConditionError`: condition parsing/evaluation
//!
//! Store and handler errors live next to their traits (`store`,
//! `invoker`), mirroring where they are produced.

use std::fmt;

/// Errors from dependency-graph analysis.
///
/// All of these are fatal to the run before any step executes; the run
/// is finalized as failed without attempting partial execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A step declares a dependency on a name not present in the step set.
    InvalidDependency { step: String, dependency: String },
    /// The dependency relation contains a cycle.
    DependencyCycle { steps: Vec<String> },
    /// Two steps share the same name.
    DuplicateStep { name: String },
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDependency { step, dependency } => {
                write!(
                    f,
                    "step '{step}' depends on unknown step '{dependency}'"
                )
            }
            Self::DependencyCycle { steps } => {
                write!(f, "dependency cycle involving steps: {}", steps.join(", "))
            }
            Self::DuplicateStep { name } => {
                write!(f, "duplicate step name '{name}'")
            }
        }
    }
}

impl std::error::Error for PlanError {}

/// Errors from expression resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    /// The value tree nests deeper than the configured limit.
    DepthExceeded { max_depth: usize },
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DepthExceeded { max_depth } => {
                write!(f, "value nesting exceeds maximum depth of {max_depth}")
            }
        }
    }
}

impl std::error::Error for ExpressionError {}

/// Errors from condition evaluation.
///
/// Callers must treat these as "condition not met" and log a
/// diagnostic; a malformed condition never aborts the operation that
/// triggered evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    /// The expression could not be parsed.
    Parse { message: String },
}

impl fmt::Display for ConditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse { message } => write!(f, "invalid condition: {message}"),
        }
    }
}

impl std::error::Error for ConditionError {}
