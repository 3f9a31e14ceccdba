//! fuzzsmith daemon entry point.
//!
//! Loads configuration, starts the orchestrator and optionally submits
//! the jobs described by a submission file given as the first argument:
//!
//! ```json
//! {"spec": {"project": "...", "function_signature": "...", "language": "c"},
//!  "backend": "local", "trials": 2}
//! ```
//!
//! Without a submission file the daemon idles until interrupted, serving
//! jobs submitted by other processes through the shared state dir.

use serde::Deserialize;
use tokio::signal;
use tracing::info;

use fuzzsmith_core::domain::{BackendKind, TargetSpec};
use fuzzsmith_core::{init_tracing, Config};
use fuzzsmith_orchestrator::App;

#[derive(Deserialize)]
struct SubmissionFile {
    spec: TargetSpec,
    backend: BackendKind,
    #[serde(default)]
    trials: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_tracing(&config.logging)?;
    info!(
        max_cycles = config.pipeline.max_cycles,
        workers = config.pipeline.worker_concurrency,
        "starting fuzzsmith"
    );

    let app = App::start(config).await?;

    if let Some(path) = std::env::args().nth(1) {
        let raw = tokio::fs::read(&path).await?;
        let submission: SubmissionFile = serde_json::from_slice(&raw)?;
        let ids = app
            .service
            .submit(submission.spec, submission.backend, submission.trials)
            .await?;
        for id in &ids {
            info!(job_id = %id, "submitted");
        }
    }

    signal::ctrl_c().await?;
    info!("shutdown requested");
    app.shutdown.cancel();
    Ok(())
}
