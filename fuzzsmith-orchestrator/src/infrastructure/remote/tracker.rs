//! Timer-driven polling of outstanding remote cycles.
//!
//! One scheduler loop polls every pending handle on a shared interval and
//! wakes the per-job waiter when its cycle turns terminal, so a worker
//! awaiting a remote build costs a suspended task rather than a poll loop
//! of its own.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fuzzsmith_core::domain::{BackendError, FuzzBackend, PollStatus, RemoteHandle};

struct Waiter {
    handle: RemoteHandle,
    notify: oneshot::Sender<PollStatus>,
}

pub struct RemoteTracker {
    backend: Arc<dyn FuzzBackend>,
    waiters: Mutex<Vec<Waiter>>,
}

impl RemoteTracker {
    pub fn new(backend: Arc<dyn FuzzBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            waiters: Mutex::new(Vec::new()),
        })
    }

    /// Start the poll loop. It runs until the shutdown token fires.
    pub fn spawn(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "remote tracker started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("remote tracker shutting down");
                        break;
                    }
                    _ = ticker.tick() => tracker.sweep().await,
                }
            }
        })
    }

    /// Poll every pending handle once; terminal ones wake their waiter.
    async fn sweep(&self) {
        let pending: Vec<Waiter> = {
            let mut waiters = self.waiters.lock().await;
            waiters.drain(..).collect()
        };
        if pending.is_empty() {
            return;
        }
        let mut keep = Vec::with_capacity(pending.len());
        for waiter in pending {
            match self.backend.poll(&waiter.handle).await {
                Ok(PollStatus::Pending) => keep.push(waiter),
                Ok(status) => {
                    debug!(remote_id = %waiter.handle.remote_id, ?status, "remote cycle terminal");
                    let _ = waiter.notify.send(status);
                }
                Err(err) => {
                    // Transient poll failures just wait for the next sweep.
                    warn!(remote_id = %waiter.handle.remote_id, error = %err, "remote poll failed");
                    keep.push(waiter);
                }
            }
        }
        self.waiters.lock().await.extend(keep);
    }

    /// Block (cheaply) until the handle turns terminal or the job is
    /// cancelled.
    pub async fn await_terminal(
        &self,
        handle: RemoteHandle,
        cancel: &CancellationToken,
    ) -> Result<PollStatus, BackendError> {
        let (notify, observed) = oneshot::channel();
        self.waiters.lock().await.push(Waiter { handle, notify });
        tokio::select! {
            _ = cancel.cancelled() => Err(BackendError::Cancelled(
                "cancelled while awaiting the remote cycle".into(),
            )),
            status = observed => {
                status.map_err(|_| BackendError::Remote("remote tracker stopped".into()))
            }
        }
    }
}
