//! Caller-facing service surface.
//!
//! Submission, status/result polling, artifact reads and cancellation.
//! Callers never learn internal file layouts: artifacts are addressed by
//! job id and name, results come from the status store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use fuzzsmith_core::config::PipelineConfig;
use fuzzsmith_core::domain::{BackendKind, FuzzJob, StageResult, StatusRecord, TargetSpec};
use fuzzsmith_core::paths;

use crate::infrastructure::status_store::{StatusStore, StatusStoreError};
use crate::infrastructure::worker_pool::Submission;

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("worker pool is not accepting jobs")]
    QueueClosed,
    #[error("status store failure: {0}")]
    Store(#[from] StatusStoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("job not found: {0}")]
    UnknownJob(Uuid),
    #[error("artifact {name:?} not found for job {job}")]
    NotFound { job: Uuid, name: String },
    #[error("invalid artifact name: {0:?}")]
    InvalidName(String),
    #[error("status store failure: {0}")]
    Store(String),
    #[error("artifact read failed: {0}")]
    Io(String),
}

/// Facade over the queue and the status store.
pub struct FuzzService {
    store: Arc<dyn StatusStore>,
    queue: mpsc::Sender<Submission>,
    cancels: Mutex<HashMap<Uuid, CancellationToken>>,
    config: PipelineConfig,
}

impl FuzzService {
    pub fn new(
        store: Arc<dyn StatusStore>,
        queue: mpsc::Sender<Submission>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            queue,
            cancels: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Submit a spec for fuzzing. Spawns `trials` independent jobs (the
    /// configured default when `None`); each trial shares only the spec,
    /// never mutable state. Returns the job ids in submission order.
    pub async fn submit(
        &self,
        spec: TargetSpec,
        backend: BackendKind,
        trials: Option<u32>,
    ) -> Result<Vec<Uuid>, SubmitError> {
        let trials = trials.unwrap_or(self.config.trials).max(1);
        let mut ids = Vec::with_capacity(trials as usize);
        for _ in 0..trials {
            let job = FuzzJob::new(spec.clone(), backend);
            let job_id = job.id;
            // The record exists (state = pending) before the caller gets
            // the id back, so an immediate poll never sees NotFound.
            self.store.create(job_id, &job.spec).await?;
            let cancel = CancellationToken::new();
            self.cancels.lock().await.insert(job_id, cancel.clone());
            self.queue
                .send(Submission { job, cancel })
                .await
                .map_err(|_| SubmitError::QueueClosed)?;
            info!(job_id = %job_id, backend = ?backend, "job submitted");
            ids.push(job_id);
        }
        Ok(ids)
    }

    pub async fn status(&self, job_id: Uuid) -> Result<StatusRecord, StatusStoreError> {
        self.store.read(job_id).await
    }

    /// Result history of a terminal job; `NotReady` while it still runs.
    pub async fn results(&self, job_id: Uuid) -> Result<Vec<StageResult>, StatusStoreError> {
        self.store.read_results(job_id).await
    }

    /// Request cooperative cancellation. Returns whether the job was
    /// known to this process.
    pub async fn cancel(&self, job_id: Uuid) -> bool {
        match self.cancels.lock().await.get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Fetch a named artifact (generated source, build script, logs,
    /// reproducer) from the job's newest cycle that has it.
    pub async fn source_artifact(&self, job_id: Uuid, name: &str) -> Result<Vec<u8>, ArtifactError> {
        if name.is_empty() || name.contains('/') || name.contains("..") {
            return Err(ArtifactError::InvalidName(name.to_string()));
        }
        // Unknown job ids fail with NotFound before any path is touched.
        self.store.read(job_id).await.map_err(|err| match err {
            StatusStoreError::NotFound(id) => ArtifactError::UnknownJob(id),
            other => ArtifactError::Store(other.to_string()),
        })?;

        for dir in self.cycle_dirs_newest_first(job_id).await? {
            let candidate = dir.join(name);
            match tokio::fs::read(&candidate).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(ArtifactError::Io(e.to_string())),
            }
        }
        Err(ArtifactError::NotFound {
            job: job_id,
            name: name.to_string(),
        })
    }

    async fn cycle_dirs_newest_first(&self, job_id: Uuid) -> Result<Vec<PathBuf>, ArtifactError> {
        let job_dir = paths::job_dir(&self.config.state_dir, job_id);
        let mut dirs = Vec::new();
        let mut entries = match tokio::fs::read_dir(&job_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(ArtifactError::Io(e.to_string())),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ArtifactError::Io(e.to_string()))?
        {
            if entry.file_name().to_string_lossy().starts_with("cycle-") {
                dirs.push(entry.path());
            }
        }
        // Zero-padded cycle names sort lexicographically.
        dirs.sort();
        dirs.reverse();
        Ok(dirs)
    }
}
