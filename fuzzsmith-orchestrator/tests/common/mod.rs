//! Shared test doubles for pipeline and backend tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use fuzzsmith_core::domain::{
    AnalysisResult, BackendError, BuildResult, CycleOutcome, Dispatch, FuzzBackend, FuzzJob,
    GeneratedTarget, GenerationError, PollStatus, RemoteHandle, RunResult, TargetGenerator,
    TargetSpec,
};

pub fn spec() -> TargetSpec {
    TargetSpec {
        project: "demo".into(),
        function_signature: "parse(const uint8_t*, size_t)".into(),
        language: "c".into(),
        context: None,
    }
}

pub fn generated_target() -> GeneratedTarget {
    GeneratedTarget {
        source_filename: "target.c".into(),
        source: "/* harness */".into(),
        build_script: "true".into(),
    }
}

pub fn run_result(covered: u64, total: u64, crashed: bool) -> RunResult {
    RunResult {
        build: BuildResult::succeeded(Some("build.log".into()), None),
        crashed,
        crash_category: crashed.then(|| "heap-buffer-overflow".to_string()),
        reproducer_ref: None,
        covered_edges: covered,
        total_edges: total,
        run_log_ref: Some("run.log".into()),
        corpus_ref: None,
        coverage_report_ref: None,
    }
}

pub fn good_outcome(covered: u64, total: u64) -> CycleOutcome {
    CycleOutcome {
        build: BuildResult::succeeded(Some("build.log".into()), None),
        run: Some(run_result(covered, total, false)),
    }
}

pub fn crash_outcome() -> CycleOutcome {
    CycleOutcome {
        build: BuildResult::succeeded(Some("build.log".into()), None),
        run: Some(run_result(30, 200, true)),
    }
}

pub fn failed_build_outcome() -> CycleOutcome {
    CycleOutcome {
        build: BuildResult::failed("cc1: fatal error", Some("build.log".into())),
        run: None,
    }
}

/// Generator that always returns the same target, or always fails.
pub struct StaticGenerator {
    pub fail: bool,
}

#[async_trait]
impl TargetGenerator for StaticGenerator {
    async fn generate(
        &self,
        _spec: &TargetSpec,
        _prior: Option<&AnalysisResult>,
    ) -> Result<GeneratedTarget, GenerationError> {
        if self.fail {
            Err(GenerationError::Failed("model produced nothing".into()))
        } else {
            Ok(generated_target())
        }
    }
}

/// Backend that replays scripted dispatch/poll/collect results.
pub struct ScriptedBackend {
    pub dispatches: Mutex<VecDeque<Dispatch>>,
    pub polls: Mutex<VecDeque<PollStatus>>,
    pub collect_outcome: Mutex<Option<CycleOutcome>>,
}

impl ScriptedBackend {
    pub fn completing(outcomes: Vec<CycleOutcome>) -> Arc<Self> {
        Arc::new(Self {
            dispatches: Mutex::new(outcomes.into_iter().map(Dispatch::Completed).collect()),
            polls: Mutex::new(VecDeque::new()),
            collect_outcome: Mutex::new(None),
        })
    }

    pub fn pending(handle: RemoteHandle, polls: Vec<PollStatus>, outcome: CycleOutcome) -> Arc<Self> {
        Arc::new(Self {
            dispatches: Mutex::new(VecDeque::from([Dispatch::Pending(handle)])),
            polls: Mutex::new(polls.into()),
            collect_outcome: Mutex::new(Some(outcome)),
        })
    }
}

#[async_trait]
impl FuzzBackend for ScriptedBackend {
    async fn dispatch(
        &self,
        _job: &FuzzJob,
        _target: &GeneratedTarget,
        _cancel: &CancellationToken,
    ) -> Result<Dispatch, BackendError> {
        self.dispatches
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| BackendError::Launch("no scripted dispatch left".into()))
    }

    async fn poll(&self, _handle: &RemoteHandle) -> Result<PollStatus, BackendError> {
        Ok(self
            .polls
            .lock()
            .await
            .pop_front()
            .unwrap_or(PollStatus::Succeeded))
    }

    async fn collect(&self, _handle: &RemoteHandle) -> Result<CycleOutcome, BackendError> {
        self.collect_outcome
            .lock()
            .await
            .clone()
            .ok_or_else(|| BackendError::Remote("no scripted outcome".into()))
    }
}
