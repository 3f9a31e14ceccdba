//! Externally visible projection of a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{JobState, Stage};

/// Durable, pollable snapshot of a job's progress.
///
/// Persisted keyed by job id so callers can poll without holding the job in
/// memory, including from other processes or hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub job_id: Uuid,
    pub stage: Stage,
    /// Fraction in `[0, 1]`.
    pub progress: f64,
    pub message: String,
    pub state: JobState,
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn initial(job_id: Uuid) -> Self {
        Self {
            job_id,
            stage: Stage::Starting,
            progress: 0.0,
            message: "submitted".into(),
            state: JobState::Pending,
            updated_at: Utc::now(),
        }
    }
}
