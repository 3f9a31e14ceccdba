//! Configuration management.
//!
//! Layered sources, lowest priority first: `config/default.toml`, an
//! environment-specific file selected by `ENV`, `config/local.toml`, and
//! finally environment variables prefixed `FUZZSMITH` with `__` as the
//! section separator. Every section has working defaults; validation runs
//! at load time so misconfiguration fails before any job stage does.

pub mod validation;

pub use validation::{Validate, ValidationError};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Logging output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Tracing filter directive, e.g. `info` or `fuzzsmith=debug,info`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on generate/build/run/analyze cycles per job.
    pub max_cycles: u32,
    /// Stopping bar: a crash-free run with at least this coverage fraction
    /// ends the cycle loop early.
    pub coverage_threshold: f64,
    /// Independent trials spawned per submission.
    pub trials: u32,
    /// Stop the cycle loop on the first crash instead of spending the full
    /// budget collecting more diverse crashes.
    pub stop_on_crash: bool,
    /// Jobs executed concurrently by the worker pool.
    pub worker_concurrency: usize,
    /// Root directory for job work dirs, artifacts and status records.
    pub state_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_cycles: 5,
            coverage_threshold: 0.5,
            trials: 1,
            stop_on_crash: false,
            worker_concurrency: 4,
            state_dir: PathBuf::from("fuzzsmith-state"),
        }
    }
}

/// Local sandbox execution settings.
///
/// `cpus` and `memory_mb` are optional on purpose: absence means the
/// process inherits the host limits. It is never treated as "unlimited"
/// by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Container runtime binary; `none` runs the build and the fuzzer as
    /// plain subprocesses.
    pub runtime: String,
    /// Runner image used when a container runtime is configured.
    pub image: String,
    /// CPU share granted to the run. `None` inherits the host limit.
    pub cpus: Option<f64>,
    /// Memory ceiling in megabytes. `None` inherits the host limit.
    pub memory_mb: Option<u64>,
    /// Shared memory size in megabytes. Default 2048.
    pub shm_mb: u64,
    /// Build step timeout in seconds.
    pub build_timeout_secs: u64,
    /// Whole-run wall clock timeout in seconds.
    pub wall_clock_secs: u64,
    /// Per-input timeout passed to the fuzzing engine. Default 30.
    pub per_input_timeout_secs: u64,
    /// Fuzzing engine selection.
    pub engine: String,
    /// Sanitizer selection.
    pub sanitizer: String,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".into(),
            image: "fuzzsmith/runner:latest".into(),
            cpus: None,
            memory_mb: None,
            shm_mb: 2048,
            build_timeout_secs: 600,
            wall_clock_secs: 1200,
            per_input_timeout_secs: 30,
            engine: "libfuzzer".into(),
            sanitizer: "address".into(),
        }
    }
}

impl LocalConfig {
    pub fn wall_clock(&self) -> Duration {
        Duration::from_secs(self.wall_clock_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }
}

/// Remote build service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the build service API.
    pub endpoint: String,
    /// Object-storage bucket holding run artifacts.
    pub bucket: String,
    pub region: String,
    /// Experiment tag prefixed to every artifact key.
    pub experiment: String,
    /// Interval between status polls of outstanding remote cycles.
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".into(),
            bucket: "fuzzsmith-artifacts".into(),
            region: "us-east-1".into(),
            experiment: "default".into(),
            poll_interval_secs: 30,
            request_timeout_secs: 30,
        }
    }
}

impl RemoteConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum invocations of a retried operation, first attempt included.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Crash-signature lines also matching one of these patterns are not
    /// counted as crashes.
    pub crash_exclusions: Vec<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            crash_exclusions: vec![
                "libFuzzer: timeout".into(),
                "libFuzzer: out-of-memory".into(),
            ],
        }
    }
}

/// Target generator collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// External command invoked per generation request; the request is
    /// JSON on stdin, the target JSON on stdout.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 120,
        }
    }
}

impl GeneratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub pipeline: PipelineConfig,
    pub local: LocalConfig,
    pub remote: RemoteConfig,
    pub retry: RetryConfig,
    pub metrics: MetricsConfig,
    pub generator: GeneratorConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationError),
}

impl Config {
    pub fn load() -> Result<Self, ConfigLoadError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));

        if let Ok(env) = std::env::var("ENV") {
            builder = builder
                .add_source(config::File::with_name(&format!("config/{}", env)).required(false));
        }

        builder = builder
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("FUZZSMITH").separator("__"));

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_documented_values() {
        let config = Config::default();
        assert_eq!(config.local.per_input_timeout_secs, 30);
        assert_eq!(config.local.shm_mb, 2048);
        assert!(config.local.cpus.is_none());
        assert!(config.local.memory_mb.is_none());
        assert_eq!(config.pipeline.max_cycles, 5);
        assert_eq!(config.pipeline.worker_concurrency, 4);
        assert!(!config.pipeline.stop_on_crash);
    }

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }
}
