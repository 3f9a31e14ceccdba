//! Fuzzing job entity and its state machines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::result::{AnalysisResult, StageResult};
use super::traits::RemoteHandle;

/// Description of the function a job should fuzz.
///
/// Owned by the caller; a job holds an immutable copy taken at submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Project the function belongs to (used for artifact naming and
    /// remote build routing).
    pub project: String,
    /// Signature of the function under test.
    pub function_signature: String,
    /// Source language of the target.
    pub language: String,
    /// Free-form context handed to the target generator (type definitions,
    /// usage examples, header excerpts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Which execution environment runs the build+fuzz cycles of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Sandboxed subprocess on this host; blocks a worker for the cycle.
    Local,
    /// Asynchronous remote build service with object-storage artifacts.
    Remote,
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    /// Returns the set of valid target states from the current state.
    ///
    /// ```text
    /// Pending ──► Running ──► Completed
    ///    │           │
    ///    └───────────┴──► Failed
    /// ```
    pub fn valid_transitions(&self) -> &[JobState] {
        match self {
            Self::Pending => &[Self::Running, Self::Failed],
            Self::Running => &[Self::Completed, Self::Failed],
            Self::Completed | Self::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, target: &JobState) -> bool {
        self.valid_transitions().contains(target)
    }

    /// Whether this state is final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Pipeline stage a job is currently in.
///
/// Stages advance forward within a cycle; a retried cycle returns to
/// `Writing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Starting,
    Writing,
    Executing,
    Analyzing,
    Done,
}

impl Stage {
    /// Nominal progress fraction reported when this stage completes.
    pub fn progress_hint(&self) -> f64 {
        match self {
            Self::Starting => 0.1,
            Self::Writing => 0.3,
            Self::Executing => 0.7,
            Self::Analyzing => 0.9,
            Self::Done => 1.0,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Writing => write!(f, "writing"),
            Self::Executing => write!(f, "executing"),
            Self::Analyzing => write!(f, "analyzing"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Recorded state transition (audit trail).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTransition {
    pub from: JobState,
    pub to: JobState,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an invalid state transition is attempted.
#[derive(Debug, thiserror::Error)]
#[error("invalid job transition from {from} to {to}")]
pub struct JobTransitionError {
    pub from: JobState,
    pub to: JobState,
}

/// One end-to-end attempt to fuzz a target function.
///
/// Owned exclusively by the pipeline worker for its lifetime; everything
/// other components see is the persisted status projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzJob {
    pub id: Uuid,
    pub spec: TargetSpec,
    pub backend: BackendKind,
    pub state: JobState,
    pub stage: Stage,
    /// Number of generate/build/run/analyze attempts consumed so far.
    pub cycle: u32,
    /// Append-only record of stage results across all cycles.
    pub history: Vec<StageResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Correlation data for an in-flight remote cycle. Opaque to the
    /// pipeline; only the remote backend interprets it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteHandle>,
    /// Ordered history of state transitions.
    #[serde(default)]
    pub transitions: Vec<JobTransition>,
}

impl FuzzJob {
    pub fn new(spec: TargetSpec, backend: BackendKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            spec,
            backend,
            state: JobState::Pending,
            stage: Stage::Starting,
            cycle: 0,
            history: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            remote: None,
            transitions: Vec::new(),
        }
    }

    /// Validated state transition; records an audit-trail entry.
    pub fn transition(
        &mut self,
        to: JobState,
        reason: Option<String>,
    ) -> Result<(), JobTransitionError> {
        if !self.state.can_transition_to(&to) {
            return Err(JobTransitionError {
                from: self.state,
                to,
            });
        }
        let now = Utc::now();
        match to {
            JobState::Running => self.started_at = Some(now),
            JobState::Completed | JobState::Failed => self.completed_at = Some(now),
            JobState::Pending => {}
        }
        self.transitions.push(JobTransition {
            from: self.state,
            to,
            timestamp: now,
            reason,
        });
        self.state = to;
        Ok(())
    }

    /// Append a stage result. Past entries are never rewritten.
    pub fn record(&mut self, result: StageResult) {
        self.history.push(result);
    }

    /// Most recent analysis across all cycles, if any.
    pub fn latest_analysis(&self) -> Option<&AnalysisResult> {
        self.history.iter().rev().find_map(|r| match r {
            StageResult::Analysis(a) => Some(a),
            _ => None,
        })
    }

    /// Best crash-free cycle: highest coverage, ties broken by the lowest
    /// cycle number.
    pub fn best_cycle(&self) -> Option<&AnalysisResult> {
        let mut best: Option<&AnalysisResult> = None;
        for result in &self.history {
            let StageResult::Analysis(analysis) = result else {
                continue;
            };
            if analysis.crashed {
                continue;
            }
            let beats = match best {
                None => true,
                Some(current) => analysis.coverage_percent() > current.coverage_percent(),
            };
            if beats {
                best = Some(analysis);
            }
        }
        best
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> TargetSpec {
        TargetSpec {
            project: "libpng".into(),
            function_signature: "png_read_info(png_structp, png_infop)".into(),
            language: "c".into(),
            context: None,
        }
    }

    #[test]
    fn new_job_starts_pending() {
        let job = FuzzJob::new(spec(), BackendKind::Local);
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.stage, Stage::Starting);
        assert_eq!(job.cycle, 0);
        assert!(job.history.is_empty());
    }

    #[test]
    fn valid_lifecycle_records_audit_trail() {
        let mut job = FuzzJob::new(spec(), BackendKind::Local);
        job.transition(JobState::Running, Some("worker picked up".into()))
            .unwrap();
        assert!(job.started_at.is_some());
        job.transition(JobState::Completed, None).unwrap();
        assert!(job.completed_at.is_some());
        assert_eq!(job.transitions.len(), 2);
        assert_eq!(job.transitions[0].from, JobState::Pending);
        assert_eq!(job.transitions[1].to, JobState::Completed);
    }

    #[test]
    fn completed_is_terminal() {
        let mut job = FuzzJob::new(spec(), BackendKind::Local);
        job.transition(JobState::Running, None).unwrap();
        job.transition(JobState::Completed, None).unwrap();
        let err = job.transition(JobState::Failed, None).unwrap_err();
        assert_eq!(err.from, JobState::Completed);
    }

    #[test]
    fn failed_is_reachable_from_pending() {
        let mut job = FuzzJob::new(spec(), BackendKind::Remote);
        job.transition(JobState::Failed, Some("store unavailable".into()))
            .unwrap();
        assert!(job.is_terminal());
    }

    #[test]
    fn stage_progress_hints_are_monotonic() {
        let stages = [
            Stage::Starting,
            Stage::Writing,
            Stage::Executing,
            Stage::Analyzing,
            Stage::Done,
        ];
        for pair in stages.windows(2) {
            assert!(pair[0].progress_hint() < pair[1].progress_hint());
        }
    }
}
