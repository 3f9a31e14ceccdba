//! Target generation via an external command.
//!
//! The collaborator that writes fuzz-target source is opaque to the
//! orchestrator: a configured command receives the generation request as
//! JSON on stdin and must print a [`GeneratedTarget`] as JSON on stdout.
//! Anything else (non-zero exit, garbage output, timeout) surfaces as a
//! failed writing stage.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use fuzzsmith_core::config::GeneratorConfig;
use fuzzsmith_core::domain::{
    AnalysisResult, GeneratedTarget, GenerationError, TargetGenerator, TargetSpec,
};

#[derive(Serialize)]
struct GenerationRequest<'a> {
    spec: &'a TargetSpec,
    /// Previous cycle's analysis, so its recommendations can steer the
    /// next attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    prior_analysis: Option<&'a AnalysisResult>,
}

#[derive(Debug)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandGenerator {
    pub fn from_config(config: &GeneratorConfig) -> Result<Self, GenerationError> {
        let mut parts = config.command.iter();
        let program = parts
            .next()
            .cloned()
            .ok_or_else(|| GenerationError::Failed("generator command is not configured".into()))?;
        Ok(Self {
            program,
            args: parts.cloned().collect(),
            timeout: config.timeout(),
        })
    }
}

#[async_trait]
impl TargetGenerator for CommandGenerator {
    async fn generate(
        &self,
        spec: &TargetSpec,
        prior: Option<&AnalysisResult>,
    ) -> Result<GeneratedTarget, GenerationError> {
        let payload = serde_json::to_vec(&GenerationRequest {
            spec,
            prior_analysis: prior,
        })
        .map_err(|e| GenerationError::Failed(format!("request serialization failed: {e}")))?;

        debug!(program = %self.program, "invoking target generator");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GenerationError::Failed(format!("failed to spawn generator: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| GenerationError::Failed("generator stdin unavailable".into()))?;
        stdin
            .write_all(&payload)
            .await
            .map_err(|e| GenerationError::Failed(format!("failed to write request: {e}")))?;
        drop(stdin);

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout))?
            .map_err(|e| GenerationError::Failed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GenerationError::Failed(stderr.trim().to_string()));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| GenerationError::InvalidOutput(e.to_string()))
    }
}
