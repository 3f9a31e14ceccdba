//! Application assembly.
//!
//! Wires configuration into a running orchestrator: status store, both
//! execution backends, the remote tracker loop, the worker pool and the
//! service facade.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use fuzzsmith_core::application::metrics::MetricsExtractor;
use fuzzsmith_core::config::{Config, Validate};
use fuzzsmith_core::domain::{FuzzBackend, TargetGenerator};
use fuzzsmith_sandbox::LocalSandbox;

use crate::application::pipeline::JobPipeline;
use crate::application::service::FuzzService;
use crate::infrastructure::generator::CommandGenerator;
use crate::infrastructure::remote::{
    HttpRemoteBuildClient, RemoteBackend, RemoteTracker, S3ArtifactStore,
};
use crate::infrastructure::status_store::{FileStatusStore, StatusStore};
use crate::infrastructure::worker_pool::spawn_worker_pool;

const SUBMISSION_QUEUE_DEPTH: usize = 128;

/// A running orchestrator.
pub struct App {
    pub service: Arc<FuzzService>,
    /// Cancelling this token stops the worker pool and the remote
    /// tracker; jobs already running finish their current stage first.
    pub shutdown: CancellationToken,
}

impl App {
    /// Build and start everything from configuration, using the external
    /// command generator configured under `[generator]`.
    pub async fn start(config: Config) -> anyhow::Result<Self> {
        let generator = Arc::new(CommandGenerator::from_config(&config.generator)?);
        Self::start_with_generator(config, generator).await
    }

    /// Same as [`App::start`] with an injected generator implementation.
    pub async fn start_with_generator(
        config: Config,
        generator: Arc<dyn TargetGenerator>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let metrics = MetricsExtractor::new(&config.metrics.crash_exclusions);
        let store: Arc<dyn StatusStore> =
            Arc::new(FileStatusStore::open(&config.pipeline.state_dir).await?);
        let shutdown = CancellationToken::new();

        let local: Arc<dyn FuzzBackend> = Arc::new(LocalSandbox::new(
            config.local.clone(),
            config.pipeline.state_dir.clone(),
            metrics.clone(),
        ));

        let remote: Arc<dyn FuzzBackend> = Arc::new(RemoteBackend::new(
            Arc::new(HttpRemoteBuildClient::new(
                &config.remote.endpoint,
                config.remote.request_timeout(),
            )?),
            Arc::new(
                S3ArtifactStore::connect(
                    config.remote.bucket.clone(),
                    config.remote.region.clone(),
                )
                .await,
            ),
            metrics,
            config.remote.clone(),
            config.retry.max_attempts,
        ));
        let tracker = RemoteTracker::new(remote.clone());
        tracker.spawn(config.remote.poll_interval(), shutdown.clone());

        let pipeline = Arc::new(JobPipeline::new(
            generator,
            local,
            Some(remote),
            Some(tracker),
            store.clone(),
            config.pipeline.clone(),
        ));

        let (queue, submissions) = mpsc::channel(SUBMISSION_QUEUE_DEPTH);
        spawn_worker_pool(
            pipeline,
            submissions,
            config.pipeline.worker_concurrency,
            shutdown.clone(),
        );

        info!(
            concurrency = config.pipeline.worker_concurrency,
            state_dir = %config.pipeline.state_dir.display(),
            "orchestrator started"
        );
        Ok(Self {
            service: Arc::new(FuzzService::new(store, queue, config.pipeline)),
            shutdown,
        })
    }
}
