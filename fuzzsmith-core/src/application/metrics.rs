//! Metrics extraction from raw fuzzer output.
//!
//! The fuzzing engine's log format is a semi-stable external contract.
//! Exactly three line shapes matter here: the coverage counter line, the
//! total-instrumented-edges line printed at startup, and crash signature
//! lines from the engine or a sanitizer. A format change in the engine
//! means updating these three patterns and nothing else.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// Coverage counter, e.g. `#4096  NEW  cov: 521 ft: 980 corp: 37/2048b`.
static COVERED_EDGES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bcov:\s*(\d+)").unwrap());

/// Instrumentation banner, e.g.
/// `INFO: Loaded 1 modules   (1024 inline 8-bit counters): ...`.
static TOTAL_EDGES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Loaded\s+\d+\s+modules?\s+\((\d+)\s+(?:inline 8-bit counters|guards|PCs)\)")
        .unwrap()
});

/// Crash signatures: engine/sanitizer error lines, sanitizer summaries,
/// and the raw deadly-signal marker.
static CRASH_SIGNATURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:ERROR:\s+(?:AddressSanitizer|LeakSanitizer|MemorySanitizer|ThreadSanitizer|UndefinedBehaviorSanitizer|libFuzzer):|SUMMARY:\s+\w+Sanitizer:|DEADLYSIGNAL)",
    )
    .unwrap()
});

/// Crash category, e.g. `heap-buffer-overflow` out of
/// `SUMMARY: AddressSanitizer: heap-buffer-overflow /src/...`.
static CRASH_CATEGORY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:ERROR|SUMMARY):\s+\w+Sanitizer:\s+([\w-]+)").unwrap());

/// Structured counts extracted from one run's log text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunMetrics {
    pub covered_edges: u64,
    /// `0` when no instrumentation banner was seen; coverage is then
    /// unknown, not measured-zero.
    pub total_edges: u64,
    pub crashed: bool,
    pub crash_category: Option<String>,
}

/// Parses fuzzer stdout/stderr into [`RunMetrics`].
///
/// Pure and line-by-line: a line never needs another line to complete its
/// match, so truncated or interleaved fragments degrade gracefully.
#[derive(Debug, Clone, Default)]
pub struct MetricsExtractor {
    exclusions: Vec<Regex>,
}

impl MetricsExtractor {
    /// Build an extractor with crash-exclusion patterns for known benign
    /// conditions (harness setup noise, per-input timeouts). An invalid
    /// pattern is skipped with a warning rather than rejected.
    pub fn new(exclusion_patterns: &[String]) -> Self {
        let exclusions = exclusion_patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(err) => {
                    warn!(pattern, error = %err, "skipping invalid crash exclusion pattern");
                    None
                }
            })
            .collect();
        Self { exclusions }
    }

    /// Extract metrics from raw log text.
    ///
    /// Coverage is monotonically non-decreasing during a run, so the last
    /// coverage line observed is authoritative.
    pub fn extract(&self, log: &str) -> RunMetrics {
        let mut metrics = RunMetrics::default();
        for line in log.lines() {
            if let Some(caps) = COVERED_EDGES.captures(line) {
                if let Ok(value) = caps[1].parse() {
                    metrics.covered_edges = value;
                }
            }
            if let Some(caps) = TOTAL_EDGES.captures(line) {
                if let Ok(value) = caps[1].parse() {
                    metrics.total_edges = value;
                }
            }
            if CRASH_SIGNATURE.is_match(line) && !self.is_excluded(line) {
                metrics.crashed = true;
                if metrics.crash_category.is_none() {
                    metrics.crash_category = CRASH_CATEGORY
                        .captures(line)
                        .map(|caps| caps[1].to_string());
                }
            }
        }
        metrics
    }

    fn is_excluded(&self, line: &str) -> bool {
        self.exclusions.iter().any(|re| re.is_match(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> MetricsExtractor {
        MetricsExtractor::new(&[
            "libFuzzer: timeout".to_string(),
            "libFuzzer: out-of-memory".to_string(),
        ])
    }

    const STARTUP: &str =
        "INFO: Loaded 1 modules   (2048 inline 8-bit counters): 2048 [0x5a2e40, 0x5b2e40)";

    #[test]
    fn last_coverage_line_wins() {
        let log = format!(
            "{STARTUP}\n#2\tINITED cov: 5 ft: 5 corp: 1/1b\n#128\tNEW    cov: 150 ft: 301 corp: 9/42b\n"
        );
        let m = extractor().extract(&log);
        assert_eq!(m.covered_edges, 150);
        assert_eq!(m.total_edges, 2048);
        assert!(!m.crashed);
    }

    #[test]
    fn no_coverage_lines_reports_unknown_not_zero_coverage() {
        let m = extractor().extract("some unrelated build noise\n");
        assert_eq!(m.covered_edges, 0);
        assert_eq!(m.total_edges, 0);
    }

    #[test]
    fn sanitizer_error_sets_crash_and_category() {
        let log = "\
==12345==ERROR: AddressSanitizer: heap-buffer-overflow on address 0x60200000eff0\n\
SUMMARY: AddressSanitizer: heap-buffer-overflow /src/target.c:42 in parse\n";
        let m = extractor().extract(log);
        assert!(m.crashed);
        assert_eq!(m.crash_category.as_deref(), Some("heap-buffer-overflow"));
    }

    #[test]
    fn excluded_signature_is_not_a_crash() {
        let log = "==99==ERROR: libFuzzer: timeout after 30 seconds\n";
        let m = extractor().extract(log);
        assert!(!m.crashed);
        assert!(m.crash_category.is_none());
    }

    #[test]
    fn exclusion_only_suppresses_matching_lines() {
        let log = "\
==99==ERROR: libFuzzer: out-of-memory (malloc(1073741824))\n\
==99==ERROR: AddressSanitizer: SEGV on unknown address 0x000000000000\n\
SUMMARY: AddressSanitizer: SEGV (/out/target+0x1234)\n";
        let m = extractor().extract(log);
        assert!(m.crashed);
        assert_eq!(m.crash_category.as_deref(), Some("SEGV"));
    }

    #[test]
    fn deadly_signal_counts_as_crash_without_category() {
        let m = extractor().extract("==7==DEADLYSIGNAL\n");
        assert!(m.crashed);
        assert!(m.crash_category.is_none());
    }

    #[test]
    fn interleaved_fragments_are_tolerated() {
        // Two writers racing on the same pipe; each line still stands alone.
        let log = format!(
            "#64\tNEW    cov: 40 ft: 70 corp\nbuild-step: done\n{STARTUP}\n#90\tNEW    cov: 61 ft"
        );
        let m = extractor().extract(&log);
        assert_eq!(m.covered_edges, 61);
        assert_eq!(m.total_edges, 2048);
    }

    #[test]
    fn invalid_exclusion_pattern_is_skipped() {
        let e = MetricsExtractor::new(&["[unclosed".to_string()]);
        let m = e.extract("==1==ERROR: AddressSanitizer: SEGV on unknown address\n");
        assert!(m.crashed);
    }
}
