//! Subprocess argument construction for the build and fuzz steps.
//!
//! The contract with the generated build script: it runs inside the cycle
//! work dir and must produce an executable named `fuzz_target` there. The
//! fuzzer is then invoked on that binary, either directly (`runtime =
//! "none"`) or inside the configured container runtime with the resource
//! caps mapped to runtime flags.

use std::path::{Path, PathBuf};

use tokio::process::Command;

use fuzzsmith_core::config::LocalConfig;

use crate::domain::limits::ResourceLimits;

pub const TARGET_BINARY: &str = "fuzz_target";
pub const BUILD_SCRIPT: &str = "build.sh";
pub const CORPUS_DIR: &str = "corpus";
pub const BUILD_LOG: &str = "build.log";
pub const RUN_LOG: &str = "run.log";

/// A fully resolved subprocess invocation.
#[derive(Debug, Clone)]
pub struct CommandPlan {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: PathBuf,
    pub env: Vec<(String, String)>,
}

impl CommandPlan {
    pub fn into_command(self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).current_dir(&self.current_dir);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command
    }

    pub fn describe(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Invocation for the build step.
pub fn build_plan(config: &LocalConfig, work_dir: &Path) -> CommandPlan {
    if config.runtime == "none" {
        return CommandPlan {
            program: "sh".into(),
            args: vec![BUILD_SCRIPT.into()],
            current_dir: work_dir.to_path_buf(),
            env: selection_env(config),
        };
    }
    CommandPlan {
        program: config.runtime.clone(),
        args: containerized(config, None, work_dir, vec!["sh".into(), BUILD_SCRIPT.into()]),
        current_dir: work_dir.to_path_buf(),
        env: Vec::new(),
    }
}

/// Invocation for the fuzzing step.
pub fn fuzz_plan(config: &LocalConfig, limits: &ResourceLimits, work_dir: &Path) -> CommandPlan {
    let invocation = engine_invocation(config, limits);
    if config.runtime == "none" {
        return CommandPlan {
            program: invocation[0].clone(),
            args: invocation[1..].to_vec(),
            current_dir: work_dir.to_path_buf(),
            env: selection_env(config),
        };
    }
    CommandPlan {
        program: config.runtime.clone(),
        args: containerized(config, Some(limits), work_dir, invocation),
        current_dir: work_dir.to_path_buf(),
        env: Vec::new(),
    }
}

/// How the selected engine is told to run the target binary.
fn engine_invocation(config: &LocalConfig, limits: &ResourceLimits) -> Vec<String> {
    match config.engine.as_str() {
        "afl" => vec![
            "afl-fuzz".into(),
            "-i".into(),
            CORPUS_DIR.into(),
            "-o".into(),
            "findings".into(),
            "-t".into(),
            format!("{}", limits.per_input_timeout.as_millis()),
            "-V".into(),
            format!("{}", limits.wall_clock.as_secs()),
            "--".into(),
            format!("./{TARGET_BINARY}"),
        ],
        // libfuzzer and anything signature-compatible with it
        _ => vec![
            format!("./{TARGET_BINARY}"),
            format!("-timeout={}", limits.per_input_timeout.as_secs()),
            format!("-max_total_time={}", limits.wall_clock.as_secs()),
            "-artifact_prefix=./".into(),
            "-print_final_stats=1".into(),
            CORPUS_DIR.into(),
        ],
    }
}

fn containerized(
    config: &LocalConfig,
    limits: Option<&ResourceLimits>,
    work_dir: &Path,
    invocation: Vec<String>,
) -> Vec<String> {
    let mut args = vec!["run".to_string(), "--rm".to_string()];
    if let Some(limits) = limits {
        args.push(format!("--shm-size={}m", limits.shm_mb));
        if let Some(cpus) = limits.cpus {
            args.push(format!("--cpus={cpus}"));
        }
        if let Some(memory_mb) = limits.memory_mb {
            args.push(format!("--memory={memory_mb}m"));
        }
    }
    args.push("-e".into());
    args.push(format!("FUZZING_ENGINE={}", config.engine));
    args.push("-e".into());
    args.push(format!("SANITIZER={}", config.sanitizer));
    args.push("-v".into());
    args.push(format!("{}:/work", work_dir.display()));
    args.push("-w".into());
    args.push("/work".into());
    args.push(config.image.clone());
    args.extend(invocation);
    args
}

fn selection_env(config: &LocalConfig) -> Vec<(String, String)> {
    vec![
        ("FUZZING_ENGINE".into(), config.engine.clone()),
        ("SANITIZER".into(), config.sanitizer.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn work_dir() -> PathBuf {
        PathBuf::from("/tmp/work")
    }

    #[test]
    fn bare_runtime_runs_the_target_directly() {
        let config = LocalConfig {
            runtime: "none".into(),
            ..LocalConfig::default()
        };
        let plan = fuzz_plan(&config, &ResourceLimits::from_config(&config), &work_dir());
        assert_eq!(plan.program, "./fuzz_target");
        assert!(plan.args.contains(&"-timeout=30".to_string()));
        assert!(plan.args.contains(&"corpus".to_string()));
        assert!(plan
            .env
            .contains(&("SANITIZER".to_string(), "address".to_string())));
    }

    #[test]
    fn container_plan_maps_caps_to_runtime_flags() {
        let config = LocalConfig {
            cpus: Some(1.5),
            memory_mb: Some(4096),
            ..LocalConfig::default()
        };
        let plan = fuzz_plan(&config, &ResourceLimits::from_config(&config), &work_dir());
        assert_eq!(plan.program, "docker");
        assert!(plan.args.contains(&"--shm-size=2048m".to_string()));
        assert!(plan.args.contains(&"--cpus=1.5".to_string()));
        assert!(plan.args.contains(&"--memory=4096m".to_string()));
        assert!(plan.args.contains(&"fuzzsmith/runner:latest".to_string()));
    }

    #[test]
    fn absent_caps_produce_no_flags() {
        let config = LocalConfig::default();
        let plan = fuzz_plan(&config, &ResourceLimits::from_config(&config), &work_dir());
        assert!(!plan.args.iter().any(|a| a.starts_with("--cpus")));
        assert!(!plan.args.iter().any(|a| a.starts_with("--memory=")));
    }

    #[test]
    fn engine_selection_switches_the_invocation() {
        let config = LocalConfig {
            runtime: "none".into(),
            engine: "afl".into(),
            ..LocalConfig::default()
        };
        let plan = fuzz_plan(&config, &ResourceLimits::from_config(&config), &work_dir());
        assert_eq!(plan.program, "afl-fuzz");
        assert!(plan.args.contains(&"--".to_string()));
    }

    #[test]
    fn build_plan_runs_the_script_in_the_work_dir() {
        let config = LocalConfig {
            runtime: "none".into(),
            ..LocalConfig::default()
        };
        let plan = build_plan(&config, &work_dir());
        assert_eq!(plan.program, "sh");
        assert_eq!(plan.args, vec!["build.sh".to_string()]);
        assert_eq!(plan.current_dir, work_dir());
    }
}
