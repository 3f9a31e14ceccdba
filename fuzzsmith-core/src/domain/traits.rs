//! Trait seams between the pipeline and its collaborators.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::job::{FuzzJob, TargetSpec};
use super::result::{AnalysisResult, CycleOutcome};

/// Generated fuzz target: source text plus the script that builds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedTarget {
    /// File name the source must be written under; the build script refers
    /// to it by this name.
    pub source_filename: String,
    pub source: String,
    pub build_script: String,
}

/// Correlation data for a cycle running on the remote build service.
///
/// Created and interpreted only by the remote backend; the pipeline carries
/// it opaquely. Artifact keys are write-once object-storage paths, read
/// back only after the remote job reports terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteHandle {
    pub remote_id: String,
    pub experiment: String,
    pub source_key: String,
    pub build_script_key: String,
    pub log_key: String,
    pub corpus_key: String,
    pub coverage_key: String,
    pub reproducer_key: String,
}

impl RemoteHandle {
    /// Allocate artifact keys for one cycle. The remote id is filled in
    /// once the submission is accepted.
    pub fn allocate(experiment: &str, job_id: Uuid, cycle: u32) -> Self {
        let prefix = format!("{experiment}/{job_id}/cycle-{cycle:03}");
        Self {
            remote_id: String::new(),
            experiment: experiment.to_string(),
            source_key: format!("{prefix}/target_source"),
            build_script_key: format!("{prefix}/build.sh"),
            log_key: format!("{prefix}/run.log"),
            corpus_key: format!("{prefix}/corpus.tar"),
            coverage_key: format!("{prefix}/coverage.json"),
            reproducer_key: format!("{prefix}/reproducer"),
        }
    }
}

/// How a dispatched cycle is tracked.
#[derive(Debug)]
pub enum Dispatch {
    /// The backend ran the whole cycle before returning.
    Completed(CycleOutcome),
    /// The cycle runs remotely; poll the handle until terminal, then
    /// collect.
    Pending(RemoteHandle),
}

/// Remote cycle status as seen by `poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Pending,
    Succeeded,
    Failed,
}

/// Faults at the execution boundary that cannot be expressed as a failed
/// build or run. Anything recoverable is converted to a typed result
/// before it reaches the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to launch cycle: {0}")]
    Launch(String),
    #[error("remote service error: {0}")]
    Remote(String),
    #[error("artifact storage error: {0}")]
    Storage(String),
    #[error("cycle cancelled: {0}")]
    Cancelled(String),
    #[error("backend does not track remote handles")]
    NoRemoteHandles,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A build+fuzz execution backend.
///
/// The two implementations (local sandbox, remote build service) produce
/// structurally identical outcomes so the pipeline and the status store
/// never branch on the backend kind.
#[async_trait]
pub trait FuzzBackend: Send + Sync {
    /// Start one build+fuzz cycle for the job's current cycle number.
    ///
    /// Local backends block until the cycle finishes and return
    /// `Completed`; remote backends submit and return `Pending`
    /// immediately. Cancelling the token mid-cycle terminates any local
    /// subprocess and surfaces as [`BackendError::Cancelled`].
    async fn dispatch(
        &self,
        job: &FuzzJob,
        target: &GeneratedTarget,
        cancel: &CancellationToken,
    ) -> Result<Dispatch, BackendError>;

    /// Query a pending cycle without blocking. Safe to call repeatedly.
    async fn poll(&self, _handle: &RemoteHandle) -> Result<PollStatus, BackendError> {
        Err(BackendError::NoRemoteHandles)
    }

    /// Assemble the outcome of a cycle that `poll` reported terminal.
    async fn collect(&self, _handle: &RemoteHandle) -> Result<CycleOutcome, BackendError> {
        Err(BackendError::NoRemoteHandles)
    }

    /// Best-effort cancellation of a pending remote cycle. Failure to
    /// cancel is tolerated; the remote job may still finish and its
    /// results are then discarded.
    async fn cancel(&self, _handle: &RemoteHandle) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Failures of the target-generation collaborator.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generator failed: {0}")]
    Failed(String),
    #[error("generator timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("invalid generator output: {0}")]
    InvalidOutput(String),
}

/// Produces fuzz-target source and a build script for a spec.
///
/// Opaque external collaborator; the pipeline surfaces its failures as a
/// failed writing stage.
#[async_trait]
pub trait TargetGenerator: Send + Sync {
    /// Generate a target. `prior` carries the previous cycle's analysis so
    /// its recommendations can steer the next attempt.
    async fn generate(
        &self,
        spec: &TargetSpec,
        prior: Option<&AnalysisResult>,
    ) -> Result<GeneratedTarget, GenerationError>;
}
