//! Per-connection channel pairs.
//!
//! A lane is two bounded channels: jobs flow from the IO worker to the
//! dispatcher, deliveries flow back. Both are sized to the number of items
//! in the worker's request batch, so neither side ever waits on a send.

use crate::server::pool::batch::Batch;
use stitchd_core::{EngineInput, Error, Image, Result};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

pub type LaneId = u64;

/// One request item on its way to the engine.
#[derive(Debug, Clone)]
pub struct Job {
    /// Position of the item in its request batch.
    pub item: usize,
    pub input: EngineInput,
}

/// The engine's answer for one job.
#[derive(Debug)]
pub struct Delivery {
    pub item: usize,
    pub outcome: Result<Image>,
}

/// Creates both ends of a lane able to carry `capacity` jobs.
pub fn lane(id: LaneId, capacity: usize) -> (WorkerLane, DispatchLane) {
    let capacity = capacity.max(1);
    let (job_tx, job_rx) = mpsc::channel(capacity);
    let (delivery_tx, delivery_rx) = mpsc::channel(capacity);

    (
        WorkerLane {
            id,
            jobs: Some(job_tx),
            deliveries: delivery_rx,
            submitted: 0,
        },
        DispatchLane {
            id,
            jobs: job_rx,
            deliveries: delivery_tx,
        },
    )
}

/// IO worker end of a lane.
#[derive(Debug)]
pub struct WorkerLane {
    id: LaneId,
    jobs: Option<mpsc::Sender<Job>>,
    deliveries: mpsc::Receiver<Delivery>,
    submitted: usize,
}

impl WorkerLane {
    pub const fn id(&self) -> LaneId {
        self.id
    }

    /// Number of jobs pushed so far.
    pub const fn submitted(&self) -> usize {
        self.submitted
    }

    /// Queues a job without waiting.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelError`] if the lane is sealed or full.
    /// - [`Error::ServiceShutdown`] if the dispatcher end is gone.
    pub fn submit(&mut self, job: Job) -> Result<()> {
        let jobs = self.jobs.as_ref().ok_or_else(|| Error::ChannelError {
            context: format!("Lane {} is sealed", self.id),
        })?;

        match jobs.try_send(job) {
            Ok(()) => {
                self.submitted += 1;
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(Error::ChannelError {
                context: format!("Lane {} is full", self.id),
            }),
            Err(TrySendError::Closed(_)) => Err(Error::ServiceShutdown),
        }
    }

    /// Closes the job side. Once the dispatcher has drained the lane it
    /// forgets about it.
    pub fn seal(&mut self) {
        self.jobs = None;
    }

    /// Waits for one delivery per submitted job and returns the images in
    /// item order. The first failed delivery fails the whole collection.
    ///
    /// # Errors
    ///
    /// - The error carried by a failed delivery.
    /// - [`Error::ServiceShutdown`] if the dispatcher stopped first.
    pub async fn collect(&mut self) -> Result<Vec<Image>> {
        let mut images: Vec<Option<Image>> = (0..self.submitted).map(|_| None).collect();
        let mut remaining = self.submitted;

        while remaining > 0 {
            let Some(Delivery { item, outcome }) = self.deliveries.recv().await else {
                return Err(Error::ServiceShutdown);
            };
            let image = outcome?;
            let slot = images.get_mut(item).ok_or_else(|| Error::ChannelError {
                context: format!("Lane {} received unknown item {item}", self.id),
            })?;
            if slot.replace(image).is_none() {
                remaining -= 1;
            }
        }

        Ok(images.into_iter().flatten().collect())
    }
}

/// What a non-blocking poll of a lane produced.
#[derive(Debug)]
pub enum Pulled {
    Job(Job),
    Empty,
    /// Drained and sealed, or abandoned by its worker.
    Closed,
}

/// Dispatcher end of a lane.
#[derive(Debug)]
pub struct DispatchLane {
    id: LaneId,
    jobs: mpsc::Receiver<Job>,
    deliveries: mpsc::Sender<Delivery>,
}

impl DispatchLane {
    pub const fn id(&self) -> LaneId {
        self.id
    }

    pub fn try_pull(&mut self) -> Pulled {
        // A worker that gave up (timeout, dropped connection) has closed its
        // receiving side; its remaining jobs are not worth an engine call.
        if self.deliveries.is_closed() {
            return Pulled::Closed;
        }
        match self.jobs.try_recv() {
            Ok(job) => Pulled::Job(job),
            Err(TryRecvError::Empty) => Pulled::Empty,
            Err(TryRecvError::Disconnected) => Pulled::Closed,
        }
    }

    /// A sender for deliveries back to this lane's worker.
    pub fn reply_to(&self) -> mpsc::Sender<Delivery> {
        self.deliveries.clone()
    }
}

/// The dispatcher's registered lanes, polled round-robin.
///
/// The cursor survives across batches, so the lane after the last one served
/// is polled first next time and no lane can be starved by its neighbours.
#[derive(Debug, Default)]
pub struct LaneSet {
    lanes: Vec<DispatchLane>,
    cursor: usize,
}

impl LaneSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, lane: DispatchLane) {
        self.lanes.push(lane);
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Fills `batch` with passes over all lanes, taking at most one job per
    /// lane per pass. Stops when the batch is full or a whole pass took
    /// nothing. Closed lanes are dropped afterwards.
    ///
    /// Returns the number of jobs taken.
    pub fn fill(&mut self, batch: &mut Batch) -> usize {
        let mut closed = vec![false; self.lanes.len()];
        let mut taken = 0;

        while !batch.is_full() && !self.lanes.is_empty() {
            let count = self.lanes.len();
            let start = self.cursor;
            let mut taken_this_pass = 0;

            for step in 0..count {
                if batch.is_full() {
                    break;
                }
                let idx = (start + step) % count;
                if closed[idx] {
                    continue;
                }

                let lane = &mut self.lanes[idx];
                match lane.try_pull() {
                    Pulled::Job(job) => {
                        batch.push(lane, job);
                        taken_this_pass += 1;
                        // Resume after the lane just served.
                        self.cursor = (idx + 1) % count;
                    }
                    Pulled::Empty => {}
                    Pulled::Closed => closed[idx] = true,
                }
            }

            taken += taken_this_pass;
            if taken_this_pass == 0 {
                break;
            }
        }

        self.drop_closed(&closed);
        taken
    }

    fn drop_closed(&mut self, closed: &[bool]) {
        if !closed.iter().any(|&c| c) {
            return;
        }

        let removed_before_cursor = closed[..self.cursor].iter().filter(|&&c| c).count();
        let mut flags = closed.iter();
        self.lanes.retain(|_| !flags.next().copied().unwrap_or(false));

        self.cursor = if self.lanes.is_empty() {
            0
        } else {
            (self.cursor - removed_before_cursor) % self.lanes.len()
        };
    }
}
