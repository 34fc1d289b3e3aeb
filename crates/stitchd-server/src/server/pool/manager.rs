//! Handle to the dispatcher task.
//!
//! The [`DispatchPool`] spawns the [`Dispatcher`], hands out lanes to IO
//! workers and coordinates its shutdown via a [`CancellationToken`].

use crate::server::pool::{
    dispatcher::Dispatcher,
    lane::{DispatchLane, Job, WorkerLane, lane},
};
use core::time::Duration;
use std::sync::atomic::{AtomicU64, Ordering};
use stitchd_core::{Error, InferenceEngine, Result};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

pub struct DispatchPool {
    registrations: mpsc::Sender<DispatchLane>,
    next_lane: AtomicU64,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchPool {
    /// Spawns the dispatcher on the current runtime.
    ///
    /// `max_lanes` bounds how many registrations may queue up before the
    /// dispatcher absorbs them; it is normally the connection limit.
    pub fn spawn<E: InferenceEngine>(
        engine: E,
        max_batch_size: usize,
        max_lanes: usize,
        shutdown_timeout: Duration,
    ) -> Self {
        let (registrations, rx) = mpsc::channel(max_lanes.max(1));
        let shutdown_token = CancellationToken::new();

        let dispatcher = Dispatcher::new(engine, max_batch_size, rx, shutdown_token.clone());
        let handle = tokio::spawn(dispatcher.run());

        Self {
            registrations,
            next_lane: AtomicU64::new(0),
            shutdown_token,
            shutdown_timeout,
            dispatcher: Mutex::new(Some(handle)),
        }
    }

    /// Opens a lane carrying `jobs`, seals it and registers it with the
    /// dispatcher. The returned lane yields the outcomes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] if the dispatcher is stopping or
    /// gone.
    pub async fn submit(&self, jobs: Vec<Job>) -> Result<WorkerLane> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        let id = self.next_lane.fetch_add(1, Ordering::Relaxed);
        let (mut worker, dispatch) = lane(id, jobs.len());
        for job in jobs {
            worker.submit(job)?;
        }
        worker.seal();

        self.registrations
            .send(dispatch)
            .await
            .map_err(|_| Error::ServiceShutdown)?;

        tracing::trace!(lane = id, jobs = worker.submitted(), "Lane registered");
        Ok(worker)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Stops the dispatcher.
    ///
    /// A batch already handed to the engine is finished and scattered; lanes
    /// still waiting afterwards observe [`Error::ServiceShutdown`]. Waits up
    /// to the configured shutdown timeout for the dispatcher to exit.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::debug!("Cancelling dispatcher via shutdown token");
        self.shutdown_token.cancel();

        let Some(handle) = self.dispatcher.lock().await.take() else {
            return Ok(());
        };

        match timeout(self.shutdown_timeout, handle).await {
            Ok(Ok(())) => {
                tracing::info!("Dispatcher shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => Err(Error::ChannelError {
                context: format!("Dispatcher task failed: {e}"),
            }),
            Err(_) => {
                tracing::warn!(
                    "Dispatcher did not stop within {:?}; abandoning the in-flight batch",
                    self.shutdown_timeout
                );
                Ok(())
            }
        }
    }
}
