//! Bounded background worker pool.
//!
//! Each job's pipeline runs on its own task; a semaphore caps how many
//! run at once so the total container and remote-build load stays
//! bounded. The pool owns a job for its whole lifetime, which is what
//! makes per-key status writes race-free.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fuzzsmith_core::domain::FuzzJob;

use crate::application::pipeline::JobPipeline;

/// One queued job plus its cancellation token.
pub struct Submission {
    pub job: FuzzJob,
    pub cancel: CancellationToken,
}

/// Consume submissions until the queue closes or shutdown fires.
pub fn spawn_worker_pool(
    pipeline: Arc<JobPipeline>,
    mut queue: mpsc::Receiver<Submission>,
    concurrency: usize,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let concurrency = concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));

    tokio::spawn(async move {
        info!(concurrency, "job worker pool started");
        loop {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(err) => {
                    error!(error = %err, "failed to acquire worker permit");
                    break;
                }
            };
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("job worker pool shutting down");
                    break;
                }
                submission = queue.recv() => {
                    let Some(Submission { job, cancel }) = submission else {
                        break;
                    };
                    let pipeline = pipeline.clone();
                    tokio::spawn(async move {
                        let job_id = job.id;
                        let finished = pipeline.run(job, cancel).await;
                        debug!(job_id = %job_id, state = %finished.state, "worker released job");
                        drop(permit);
                    });
                }
            }
        }
        warn!("job worker pool exiting");
    })
}
