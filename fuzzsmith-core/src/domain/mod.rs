//! Domain entities and value objects.

pub mod job;
pub mod result;
pub mod status;
pub mod traits;

pub use job::{BackendKind, FuzzJob, JobState, JobTransition, JobTransitionError, Stage, TargetSpec};
pub use result::{AnalysisResult, BuildResult, CycleOutcome, RunResult, StageResult};
pub use status::StatusRecord;
pub use traits::{
    BackendError, Dispatch, FuzzBackend, GeneratedTarget, GenerationError, PollStatus,
    RemoteHandle, TargetGenerator,
};
