//! Filesystem-backed status store.
//!
//! One JSON document per job id under `<state_dir>/status/`. Writes go to
//! a sibling temp file and are renamed into place, so a concurrent reader
//! never observes a partial document and the record survives process
//! restarts.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use fuzzsmith_core::domain::{JobState, Stage, StageResult, StatusRecord, TargetSpec};
use fuzzsmith_core::paths;

use super::{StatusDocument, StatusStore, StatusStoreError};

pub struct FileStatusStore {
    root: PathBuf,
}

impl FileStatusStore {
    pub async fn open(state_dir: &std::path::Path) -> Result<Self, StatusStoreError> {
        let root = paths::status_dir(state_dir);
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StatusStoreError::Io(e.to_string()))?;
        Ok(Self { root })
    }

    fn document_path(&self, job_id: Uuid) -> PathBuf {
        self.root.join(format!("{job_id}.json"))
    }

    async fn load(&self, job_id: Uuid) -> Result<StatusDocument, StatusStoreError> {
        match tokio::fs::read(self.document_path(job_id)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StatusStoreError::Serialization(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StatusStoreError::NotFound(job_id))
            }
            Err(e) => Err(StatusStoreError::Io(e.to_string())),
        }
    }

    async fn persist(
        &self,
        job_id: Uuid,
        document: &StatusDocument,
    ) -> Result<(), StatusStoreError> {
        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|e| StatusStoreError::Serialization(e.to_string()))?;
        let tmp = self.root.join(format!("{job_id}.json.tmp"));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StatusStoreError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp, self.document_path(job_id))
            .await
            .map_err(|e| StatusStoreError::Io(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl StatusStore for FileStatusStore {
    async fn create(&self, job_id: Uuid, spec: &TargetSpec) -> Result<(), StatusStoreError> {
        let document = StatusDocument {
            status: StatusRecord::initial(job_id),
            spec: spec.clone(),
            results: None,
        };
        self.persist(job_id, &document).await?;
        debug!(job_id = %job_id, "status record created");
        Ok(())
    }

    async fn update(
        &self,
        job_id: Uuid,
        stage: Stage,
        progress: f64,
        message: &str,
        state: JobState,
    ) -> Result<(), StatusStoreError> {
        let mut document = self.load(job_id).await?;
        document.status = StatusRecord {
            job_id,
            stage,
            progress,
            message: message.to_string(),
            state,
            updated_at: Utc::now(),
        };
        self.persist(job_id, &document).await
    }

    async fn read(&self, job_id: Uuid) -> Result<StatusRecord, StatusStoreError> {
        Ok(self.load(job_id).await?.status)
    }

    async fn save_results(
        &self,
        job_id: Uuid,
        history: &[StageResult],
    ) -> Result<(), StatusStoreError> {
        let mut document = self.load(job_id).await?;
        document.results = Some(history.to_vec());
        self.persist(job_id, &document).await
    }

    async fn read_results(&self, job_id: Uuid) -> Result<Vec<StageResult>, StatusStoreError> {
        let document = self.load(job_id).await?;
        if !document.status.state.is_terminal() {
            return Err(StatusStoreError::NotReady(job_id));
        }
        Ok(document.results.unwrap_or_default())
    }
}
