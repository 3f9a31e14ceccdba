//! Stage results: the append-only record of what each pipeline stage
//! produced.

use serde::{Deserialize, Serialize};

/// Outcome of a build step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    /// Reference to the captured build log (path or storage key).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_ref: Option<String>,
    /// Reference to the compiled artifact, when the build produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BuildResult {
    pub fn succeeded(log_ref: Option<String>, artifact_ref: Option<String>) -> Self {
        Self {
            success: true,
            log_ref,
            artifact_ref,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, log_ref: Option<String>) -> Self {
        Self {
            success: false,
            log_ref,
            artifact_ref: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of a fuzzing run, including the build that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    #[serde(flatten)]
    pub build: BuildResult,
    pub crashed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crash_category: Option<String>,
    /// Reference to a crash reproducer input, when one was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reproducer_ref: Option<String>,
    pub covered_edges: u64,
    pub total_edges: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_log_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corpus_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_report_ref: Option<String>,
}

impl RunResult {
    /// Fraction of instrumented edges reached by the run.
    ///
    /// `0.0` when the total is unknown; callers distinguish unknown from
    /// measured-zero via [`RunResult::coverage_known`].
    pub fn coverage_percent(&self) -> f64 {
        if self.total_edges > 0 {
            self.covered_edges as f64 / self.total_edges as f64
        } else {
            0.0
        }
    }

    /// Whether the run reported a total instrumented edge count at all.
    pub fn coverage_known(&self) -> bool {
        self.total_edges > 0
    }
}

/// Outcome of the analysis step that closes a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Whether this cycle met the stopping bar.
    pub success: bool,
    /// Cycle number this analysis belongs to.
    pub cycle: u32,
    pub recommendations: Vec<String>,
    pub crashed: bool,
    pub covered_edges: u64,
    pub total_edges: u64,
    /// Run log the analysis was derived from, when a run happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_log_ref: Option<String>,
}

impl AnalysisResult {
    pub fn coverage_percent(&self) -> f64 {
        if self.total_edges > 0 {
            self.covered_edges as f64 / self.total_edges as f64
        } else {
            0.0
        }
    }
}

/// One entry in a job's history. Appended once per completed stage and
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageResult {
    Build(BuildResult),
    Run(RunResult),
    Analysis(AnalysisResult),
}

/// What one build+fuzz cycle produced, identical in shape for both
/// execution backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleOutcome {
    pub build: BuildResult,
    /// Absent when the build failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<RunResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn run(covered: u64, total: u64) -> RunResult {
        RunResult {
            build: BuildResult::succeeded(None, None),
            crashed: false,
            crash_category: None,
            reproducer_ref: None,
            covered_edges: covered,
            total_edges: total,
            run_log_ref: None,
            corpus_ref: None,
            coverage_report_ref: None,
        }
    }

    #[test]
    fn coverage_is_ratio_of_edges() {
        assert_eq!(run(150, 200).coverage_percent(), 0.75);
    }

    #[test]
    fn zero_total_edges_means_zero_not_a_fault() {
        let r = run(0, 0);
        assert_eq!(r.coverage_percent(), 0.0);
        assert!(!r.coverage_known());
    }

    #[test]
    fn history_entries_round_trip_through_json() {
        let entries = vec![
            StageResult::Build(BuildResult::failed("cc1: fatal error", None)),
            StageResult::Run(run(10, 40)),
            StageResult::Analysis(AnalysisResult {
                success: false,
                cycle: 1,
                recommendations: vec!["add boundary-value inputs".into()],
                crashed: false,
                covered_edges: 10,
                total_edges: 40,
                run_log_ref: None,
            }),
        ];
        let json = serde_json::to_string(&entries).unwrap();
        let back: Vec<StageResult> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 3);
        match &back[2] {
            StageResult::Analysis(a) => assert_eq!(a.cycle, 1),
            other => panic!("expected analysis entry, got {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn coverage_percent_is_always_finite(covered in any::<u64>(), total in any::<u64>()) {
            let percent = run(covered, total).coverage_percent();
            prop_assert!(percent.is_finite());
            if total == 0 {
                prop_assert_eq!(percent, 0.0);
            }
        }
    }
}
