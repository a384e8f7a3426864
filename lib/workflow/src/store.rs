//! Run persistence boundary.
//!
//! The storage engine is a collaborator's responsibility; the engine
//! only needs create/update for run records and a filtered listing for
//! history. `InMemoryRunStore` backs tests and single-process
//! embeddings.

use crate::run::{RunStatus, WorkflowRun};
use async_trait::async_trait;
use std::fmt;
use tokio::sync::RwLock;
use vellum_core::{WorkflowId, WorkflowRunId};

/// Errors from run persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Failed to create the run record.
    CreateFailed { message: String },
    /// Failed to update the run record.
    UpdateFailed { message: String },
    /// The run record does not exist.
    NotFound { run_id: WorkflowRunId },
    /// A listing query failed.
    QueryFailed { message: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateFailed { message } => write!(f, "run create failed: {message}"),
            Self::UpdateFailed { message } => write!(f, "run update failed: {message}"),
            Self::NotFound { run_id } => write!(f, "run not found: {run_id}"),
            Self::QueryFailed { message } => write!(f, "run query failed: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Filter for listing past runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFilter {
    /// Restrict to one workflow.
    pub workflow_id: Option<WorkflowId>,
    /// Restrict to one status.
    pub status: Option<RunStatus>,
    /// Maximum number of records, most recent first.
    pub limit: Option<usize>,
}

impl RunFilter {
    /// An unrestricted filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to the given workflow.
    #[must_use]
    pub fn for_workflow(mut self, workflow_id: WorkflowId) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }

    /// Restricts to the given status.
    #[must_use]
    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Caps the number of returned records.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Trait for run-record persistence.
///
/// Implementations must tolerate `update_run` being called repeatedly
/// for the same record as execution progresses.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persists a new run record.
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), StoreError>;

    /// Persists the current state of an existing run record.
    async fn update_run(&self, run: &WorkflowRun) -> Result<(), StoreError>;

    /// Fetches a run by ID.
    async fn get_run(&self, run_id: WorkflowRunId) -> Result<Option<WorkflowRun>, StoreError>;

    /// Lists runs matching the filter, most recent first.
    async fn list_runs(&self, filter: RunFilter) -> Result<Vec<WorkflowRun>, StoreError>;
}

/// In-memory run store for tests and single-process embeddings.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: RwLock<Vec<WorkflowRun>>,
}

impl InMemoryRunStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        if runs.iter().any(|r| r.id == run.id) {
            return Err(StoreError::CreateFailed {
                message: format!("run {} already exists", run.id),
            });
        }
        runs.push(run.clone());
        Ok(())
    }

    async fn update_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        match runs.iter_mut().find(|r| r.id == run.id) {
            Some(existing) => {
                *existing = run.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound { run_id: run.id }),
        }
    }

    async fn get_run(&self, run_id: WorkflowRunId) -> Result<Option<WorkflowRun>, StoreError> {
        let runs = self.runs.read().await;
        Ok(runs.iter().find(|r| r.id == run_id).cloned())
    }

    async fn list_runs(&self, filter: RunFilter) -> Result<Vec<WorkflowRun>, StoreError> {
        let runs = self.runs.read().await;
        let mut matched: Vec<WorkflowRun> = runs
            .iter()
            .filter(|r| filter.workflow_id.is_none_or(|id| r.workflow_id == id))
            .filter(|r| filter.status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{Step, Workflow};

    fn workflow() -> Workflow {
        Workflow::new("Test").with_step(Step::new("a", "noop"))
    }

    #[tokio::test]
    async fn create_then_get() {
        let store = InMemoryRunStore::new();
        let run = WorkflowRun::new(&workflow(), "manual");

        store.create_run(&run).await.unwrap();
        let fetched = store.get_run(run.id).await.unwrap().expect("run exists");
        assert_eq!(fetched.id, run.id);
    }

    #[tokio::test]
    async fn create_rejects_duplicate_ids() {
        let store = InMemoryRunStore::new();
        let run = WorkflowRun::new(&workflow(), "manual");

        store.create_run(&run).await.unwrap();
        let err = store.create_run(&run).await.unwrap_err();
        assert!(matches!(err, StoreError::CreateFailed { .. }));
    }

    #[tokio::test]
    async fn update_replaces_record() {
        let store = InMemoryRunStore::new();
        let mut run = WorkflowRun::new(&workflow(), "manual");
        store.create_run(&run).await.unwrap();

        run.start();
        run.finalize();
        store.update_run(&run).await.unwrap();

        let fetched = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn update_of_unknown_run_fails() {
        let store = InMemoryRunStore::new();
        let run = WorkflowRun::new(&workflow(), "manual");
        let err = store.update_run(&run).await.unwrap_err();
        assert_eq!(err, StoreError::NotFound { run_id: run.id });
    }

    #[tokio::test]
    async fn list_filters_by_workflow_status_and_limit() {
        let store = InMemoryRunStore::new();
        let wf_a = workflow();
        let wf_b = workflow();

        for _ in 0..3 {
            let mut run = WorkflowRun::new(&wf_a, "manual");
            run.start();
            run.finalize();
            store.create_run(&run).await.unwrap();
            store.update_run(&run).await.unwrap();
        }
        let mut failed = WorkflowRun::new(&wf_a, "manual");
        failed.fail("boom");
        store.create_run(&failed).await.unwrap();
        store.create_run(&WorkflowRun::new(&wf_b, "manual")).await.unwrap();

        let all_a = store
            .list_runs(RunFilter::new().for_workflow(wf_a.id))
            .await
            .unwrap();
        assert_eq!(all_a.len(), 4);

        let completed_a = store
            .list_runs(
                RunFilter::new()
                    .for_workflow(wf_a.id)
                    .with_status(RunStatus::Completed),
            )
            .await
            .unwrap();
        assert_eq!(completed_a.len(), 3);

        let capped = store
            .list_runs(RunFilter::new().with_limit(2))
            .await
            .unwrap();
        assert_eq!(capped.len(), 2);
    }
}
