//! Durable, pollable job status and results.
//!
//! The store is the only state shared across workers. Every update is a
//! full overwrite of the record keyed by job id (last-writer-wins); the
//! one-worker-per-job ownership rule guarantees no two writers race on
//! the same key. Stage and progress are expected to be monotonically
//! non-decreasing within a job; a regression is a caller bug, not a
//! store-level error.

pub mod file;
pub mod memory;

pub use file::FileStatusStore;
pub use memory::InMemoryStatusStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fuzzsmith_core::domain::{JobState, Stage, StageResult, StatusRecord, TargetSpec};

#[derive(Debug, thiserror::Error)]
pub enum StatusStoreError {
    #[error("job not found: {0}")]
    NotFound(Uuid),
    #[error("job {0} has not reached a terminal state")]
    NotReady(Uuid),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("storage i/o failure: {0}")]
    Io(String),
}

/// Everything persisted for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusDocument {
    pub status: StatusRecord,
    pub spec: TargetSpec,
    /// Populated once the job reaches a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<StageResult>>,
}

/// Keyed job status storage with concurrent reads and per-key atomic
/// writes.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Create the initial record for a freshly submitted job.
    async fn create(&self, job_id: Uuid, spec: &TargetSpec) -> Result<(), StatusStoreError>;

    /// Overwrite the visible status of a job.
    async fn update(
        &self,
        job_id: Uuid,
        stage: Stage,
        progress: f64,
        message: &str,
        state: JobState,
    ) -> Result<(), StatusStoreError>;

    async fn read(&self, job_id: Uuid) -> Result<StatusRecord, StatusStoreError>;

    /// Persist the full result history alongside the status record.
    async fn save_results(
        &self,
        job_id: Uuid,
        history: &[StageResult],
    ) -> Result<(), StatusStoreError>;

    /// Read the result history of a terminal job. Fails with
    /// [`StatusStoreError::NotReady`] while the job is still running,
    /// which callers must distinguish from [`StatusStoreError::NotFound`].
    async fn read_results(&self, job_id: Uuid) -> Result<Vec<StageResult>, StatusStoreError>;
}
