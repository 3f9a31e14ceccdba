//! Configuration validation.
//!
//! A bad configuration is never retried; it fails here, before any job
//! stage runs.

use super::Config;

const ENGINES: &[&str] = &["libfuzzer", "afl"];
const SANITIZERS: &[&str] = &["address", "memory", "undefined", "none"];

#[derive(Debug, thiserror::Error)]
#[error("invalid configuration: {field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

impl Validate for Config {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.pipeline.max_cycles == 0 {
            return Err(ValidationError::new("pipeline.max_cycles", "must be >= 1"));
        }
        if self.pipeline.trials == 0 {
            return Err(ValidationError::new("pipeline.trials", "must be >= 1"));
        }
        if self.pipeline.worker_concurrency == 0 {
            return Err(ValidationError::new(
                "pipeline.worker_concurrency",
                "must be >= 1",
            ));
        }
        if !(self.pipeline.coverage_threshold > 0.0 && self.pipeline.coverage_threshold <= 1.0) {
            return Err(ValidationError::new(
                "pipeline.coverage_threshold",
                format!(
                    "must be in (0, 1], got {}",
                    self.pipeline.coverage_threshold
                ),
            ));
        }
        if !ENGINES.contains(&self.local.engine.as_str()) {
            return Err(ValidationError::new(
                "local.engine",
                format!("unknown engine '{}'", self.local.engine),
            ));
        }
        if !SANITIZERS.contains(&self.local.sanitizer.as_str()) {
            return Err(ValidationError::new(
                "local.sanitizer",
                format!("unknown sanitizer '{}'", self.local.sanitizer),
            ));
        }
        // Memory sanitizer needs the instrumented-everything runtime that
        // only the libfuzzer image ships.
        if self.local.sanitizer == "memory" && self.local.engine != "libfuzzer" {
            return Err(ValidationError::new(
                "local.sanitizer",
                format!(
                    "sanitizer 'memory' is incompatible with engine '{}'",
                    self.local.engine
                ),
            ));
        }
        if self.local.wall_clock_secs == 0 {
            return Err(ValidationError::new("local.wall_clock_secs", "must be >= 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ValidationError::new("retry.max_attempts", "must be >= 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_cycles() {
        let mut config = Config::default();
        config.pipeline.max_cycles = 0;
        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "pipeline.max_cycles");
    }

    #[test]
    fn rejects_threshold_above_one() {
        let mut config = Config::default();
        config.pipeline.coverage_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_engine() {
        let mut config = Config::default();
        config.local.engine = "honggfuzz".into();
        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "local.engine");
    }

    #[test]
    fn rejects_incompatible_engine_sanitizer_pair() {
        let mut config = Config::default();
        config.local.engine = "afl".into();
        config.local.sanitizer = "memory".into();
        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "local.sanitizer");
    }
}
