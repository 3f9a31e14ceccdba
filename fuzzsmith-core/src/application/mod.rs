//! Application services shared across backends.

pub mod metrics;

pub use metrics::{MetricsExtractor, RunMetrics};
