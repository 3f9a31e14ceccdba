//! Resource limits applied to a local build+fuzz cycle.

use std::time::Duration;

use fuzzsmith_core::config::LocalConfig;

/// Caps applied to the sandboxed run.
///
/// `cpus` and `memory_mb` stay `None` when unconfigured: the subprocess
/// then inherits whatever the host enforces. Nothing here silently means
/// "unlimited".
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// CPU share, e.g. `1.5` cores.
    pub cpus: Option<f64>,
    /// Memory ceiling in megabytes.
    pub memory_mb: Option<u64>,
    /// Shared memory size in megabytes.
    pub shm_mb: u64,
    /// Build step timeout.
    pub build_timeout: Duration,
    /// Whole-run wall clock timeout.
    pub wall_clock: Duration,
    /// Per-input timeout enforced by the fuzzing engine itself.
    pub per_input_timeout: Duration,
}

impl ResourceLimits {
    pub fn from_config(config: &LocalConfig) -> Self {
        Self {
            cpus: config.cpus,
            memory_mb: config.memory_mb,
            shm_mb: config.shm_mb,
            build_timeout: config.build_timeout(),
            wall_clock: config.wall_clock(),
            per_input_timeout: Duration::from_secs(config.per_input_timeout_secs),
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::from_config(&LocalConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.per_input_timeout, Duration::from_secs(30));
        assert_eq!(limits.shm_mb, 2048);
        assert!(limits.cpus.is_none());
        assert!(limits.memory_mb.is_none());
    }

    #[test]
    fn configured_caps_are_carried_over() {
        let config = LocalConfig {
            cpus: Some(2.0),
            memory_mb: Some(4096),
            wall_clock_secs: 300,
            ..LocalConfig::default()
        };
        let limits = ResourceLimits::from_config(&config);
        assert_eq!(limits.cpus, Some(2.0));
        assert_eq!(limits.memory_mb, Some(4096));
        assert_eq!(limits.wall_clock, Duration::from_secs(300));
    }
}
