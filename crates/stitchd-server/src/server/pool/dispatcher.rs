use crate::server::{
    pool::{
        batch::Batch,
        lane::{DispatchLane, LaneSet},
    },
    telemetry::{increment_engine_failures, record_batch_size, record_dispatch_duration},
};
use core::any::Any;
use std::{panic::AssertUnwindSafe, time::Instant};
use stitchd_core::{EngineInput, Error, Image, InferenceEngine, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Single owner of the inference engine.
///
/// Collects jobs from every registered lane into a [`Batch`], calls the
/// engine once per batch and scatters the outputs back. The loop cycles
/// `COLLECTING -> DISPATCHING -> SCATTERING -> COLLECTING`, parks in `IDLE`
/// while no lane has work, and stops when the shutdown token is cancelled.
///
/// The engine runs on the blocking thread pool and is moved in and out for
/// each call, so the dispatcher task itself never blocks the runtime.
pub struct Dispatcher<E> {
    engine: Option<E>,
    lanes: LaneSet,
    registrations: mpsc::Receiver<DispatchLane>,
    batch: Batch,
    shutdown: CancellationToken,
}

impl<E: InferenceEngine> Dispatcher<E> {
    pub fn new(
        engine: E,
        max_batch_size: usize,
        registrations: mpsc::Receiver<DispatchLane>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine: Some(engine),
            lanes: LaneSet::new(),
            registrations,
            batch: Batch::new(max_batch_size),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::trace!("Dispatcher started");

        while !self.shutdown.is_cancelled() {
            while let Ok(lane) = self.registrations.try_recv() {
                self.lanes.push(lane);
            }

            self.lanes.fill(&mut self.batch);

            if self.batch.is_empty() {
                if !self.wait_for_lane().await {
                    break;
                }
                continue;
            }

            self.dispatch().await;
        }

        // Dropping the remaining lanes closes their delivery channels, which
        // tells any worker still waiting that the service is going away.
        tracing::debug!(pending_lanes = self.lanes.len(), "Dispatcher stopped");
    }

    /// Parks until a lane is registered. Returns `false` on shutdown.
    async fn wait_for_lane(&mut self) -> bool {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => false,
            lane = self.registrations.recv() => match lane {
                Some(lane) => {
                    self.lanes.push(lane);
                    true
                }
                None => false,
            },
        }
    }

    #[tracing::instrument(
        name = "dispatch",
        skip_all,
        fields(size = self.batch.len(), lanes = self.batch.lane_count())
    )]
    async fn dispatch(&mut self) {
        let size = self.batch.len();
        let inputs = self.batch.take_inputs();
        let start = Instant::now();

        let outputs = match self.engine.take() {
            Some(engine) => {
                let (engine, outputs) = run_engine(engine, inputs).await;
                self.engine = engine;
                outputs
            }
            None => Err(Error::Engine {
                reason: "inference engine is unavailable".to_string(),
            }),
        };

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        record_batch_size(size as f64);
        record_dispatch_duration(elapsed_ms);

        if let Err(e) = &outputs {
            increment_engine_failures();
            tracing::warn!("Batch of {size} failed: {e}");
        }

        let scatter = self.batch.scatter(outputs);
        tracing::debug!(
            delivered = scatter.delivered,
            dropped = scatter.dropped,
            elapsed_ms,
            "Batch dispatched"
        );
    }
}

/// Runs one engine call on the blocking pool with panics contained.
///
/// Hands the engine back unless the blocking task itself was lost.
async fn run_engine<E: InferenceEngine>(
    mut engine: E,
    inputs: Vec<EngineInput>,
) -> (Option<E>, Result<Vec<Image>>) {
    let task = tokio::task::spawn_blocking(move || {
        let outputs = std::panic::catch_unwind(AssertUnwindSafe(|| engine.impute(&inputs)));
        (engine, outputs)
    });

    match task.await {
        Ok((engine, Ok(outputs))) => (Some(engine), outputs),
        Ok((engine, Err(payload))) => {
            let reason = format!("engine panicked: {}", panic_message(payload.as_ref()));
            tracing::error!("{reason}");
            (Some(engine), Err(Error::Engine { reason }))
        }
        Err(e) => {
            tracing::error!("Engine task failed: {e}");
            (
                None,
                Err(Error::Engine {
                    reason: format!("engine task failed: {e}"),
                }),
            )
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
