//! Stopping-bar evaluation for one cycle.

use fuzzsmith_core::config::PipelineConfig;
use fuzzsmith_core::domain::{AnalysisResult, RunResult};

/// Decide whether a run meets the stopping bar and gather recommendations
/// for the next attempt when it does not.
///
/// A crash never passes the bar, but it does not fail the job either; it
/// is an informative outcome the next generation round can react to.
/// Unknown coverage (no instrumentation banner observed) also never
/// passes: absence of data is not evidence of coverage.
pub fn evaluate(run: &RunResult, cycle: u32, config: &PipelineConfig) -> AnalysisResult {
    let coverage = run.coverage_percent();
    let success = !run.crashed && run.coverage_known() && coverage >= config.coverage_threshold;

    let mut recommendations = Vec::new();
    if run.crashed {
        let category = run.crash_category.as_deref().unwrap_or("uncategorized");
        recommendations.push(format!(
            "run crashed ({category}); inspect the reproducer before widening inputs"
        ));
    }
    if !run.coverage_known() {
        recommendations.push(
            "no coverage data observed; verify the harness links the instrumented target".into(),
        );
    } else if coverage < config.coverage_threshold {
        recommendations.push(format!(
            "coverage {:.1}% is below the {:.1}% bar; add boundary-value and structure-aware inputs",
            coverage * 100.0,
            config.coverage_threshold * 100.0
        ));
        if run.covered_edges < run.total_edges / 10 {
            recommendations
                .push("almost nothing executed; check that the harness reaches the target".into());
        }
    }

    AnalysisResult {
        success,
        cycle,
        recommendations,
        crashed: run.crashed,
        covered_edges: run.covered_edges,
        total_edges: run.total_edges,
        run_log_ref: run.run_log_ref.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fuzzsmith_core::domain::BuildResult;

    fn run(covered: u64, total: u64, crashed: bool) -> RunResult {
        RunResult {
            build: BuildResult::succeeded(None, None),
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

    fn config(threshold: f64) -> PipelineConfig {
        PipelineConfig {
            coverage_threshold: threshold,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn crash_free_coverage_at_threshold_passes() {
        // 150/200 = 0.75, bar at 0.75.
        let analysis = evaluate(&run(150, 200, false), 1, &config(0.75));
        assert!(analysis.success);
        assert!(analysis.recommendations.is_empty());
    }

    #[test]
    fn coverage_below_threshold_gathers_recommendations_without_failing() {
        let analysis = evaluate(&run(150, 200, false), 1, &config(0.8));
        assert!(!analysis.success);
        assert!(analysis.recommendations[0].contains("below"));
    }

    #[test]
    fn crash_never_passes_the_bar() {
        let analysis = evaluate(&run(190, 200, true), 2, &config(0.5));
        assert!(!analysis.success);
        assert!(analysis.crashed);
        assert!(analysis.recommendations[0].contains("heap-buffer-overflow"));
    }

    #[test]
    fn unknown_coverage_is_not_zero_coverage() {
        let analysis = evaluate(&run(0, 0, false), 1, &config(0.1));
        assert!(!analysis.success);
        assert!(analysis
            .recommendations
            .iter()
            .any(|r| r.contains("no coverage data")));
    }
}
