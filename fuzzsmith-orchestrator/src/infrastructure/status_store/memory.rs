//! In-memory status store for tests and single-process runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use fuzzsmith_core::domain::{JobState, Stage, StageResult, StatusRecord, TargetSpec};

use super::{StatusDocument, StatusStore, StatusStoreError};

#[derive(Default)]
pub struct InMemoryStatusStore {
    documents: RwLock<HashMap<Uuid, StatusDocument>>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn create(&self, job_id: Uuid, spec: &TargetSpec) -> Result<(), StatusStoreError> {
        self.documents.write().await.insert(
            job_id,
            StatusDocument {
                status: StatusRecord::initial(job_id),
                spec: spec.clone(),
                results: None,
            },
        );
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
        let mut documents = self.documents.write().await;
        let document = documents
            .get_mut(&job_id)
            .ok_or(StatusStoreError::NotFound(job_id))?;
        document.status = StatusRecord {
            job_id,
            stage,
            progress,
            message: message.to_string(),
            state,
            updated_at: Utc::now(),
        };
        Ok(())
    }

    async fn read(&self, job_id: Uuid) -> Result<StatusRecord, StatusStoreError> {
        self.documents
            .read()
            .await
            .get(&job_id)
            .map(|d| d.status.clone())
            .ok_or(StatusStoreError::NotFound(job_id))
    }

    async fn save_results(
        &self,
        job_id: Uuid,
        history: &[StageResult],
    ) -> Result<(), StatusStoreError> {
        let mut documents = self.documents.write().await;
        let document = documents
            .get_mut(&job_id)
            .ok_or(StatusStoreError::NotFound(job_id))?;
        document.results = Some(history.to_vec());
        Ok(())
    }

    async fn read_results(&self, job_id: Uuid) -> Result<Vec<StageResult>, StatusStoreError> {
        let documents = self.documents.read().await;
        let document = documents
            .get(&job_id)
            .ok_or(StatusStoreError::NotFound(job_id))?;
        if !document.status.state.is_terminal() {
            return Err(StatusStoreError::NotReady(job_id));
        }
        Ok(document.results.clone().unwrap_or_default())
    }
}
