//! The unit of work handed to the engine.

use crate::server::pool::lane::{Delivery, DispatchLane, Job, LaneId};
use core::mem;
use stitchd_core::{EngineInput, Error, Image, Result};
use tokio::sync::mpsc;

/// Where the output of one slot goes.
#[derive(Debug)]
struct Route {
    lane: LaneId,
    item: usize,
    reply: mpsc::Sender<Delivery>,
}

/// Slot-indexed jobs collected for a single engine call.
///
/// Slot `i` of the engine input is slot `i` of the routing table; that
/// position is the only thing correlating an output with its job.
#[derive(Debug)]
pub struct Batch {
    capacity: usize,
    inputs: Vec<EngineInput>,
    routes: Vec<Route>,
}

/// Result of fanning engine outputs back out to the lanes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Scatter {
    pub delivered: usize,
    /// Deliveries whose worker had already gone away.
    pub dropped: usize,
}

impl Batch {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inputs: Vec::with_capacity(capacity),
            routes: Vec::with_capacity(capacity),
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.routes.len() >= self.capacity
    }

    /// Adds `job` at the next slot and returns that slot.
    pub fn push(&mut self, lane: &DispatchLane, job: Job) -> usize {
        let slot = self.routes.len();
        self.inputs.push(job.input);
        self.routes.push(Route {
            lane: lane.id(),
            item: job.item,
            reply: lane.reply_to(),
        });
        slot
    }

    /// `(lane, item)` for every slot, in slot order.
    pub fn routes(&self) -> impl Iterator<Item = (LaneId, usize)> + '_ {
        self.routes.iter().map(|route| (route.lane, route.item))
    }

    /// Number of distinct lanes with a job in this batch.
    pub fn lane_count(&self) -> usize {
        let mut lanes: Vec<LaneId> = self.routes.iter().map(|route| route.lane).collect();
        lanes.sort_unstable();
        lanes.dedup();
        lanes.len()
    }

    /// Moves the engine inputs out, in slot order. Routing stays in place
    /// until [`Batch::scatter`].
    pub fn take_inputs(&mut self) -> Vec<EngineInput> {
        mem::take(&mut self.inputs)
    }

    /// Delivers `outputs[i]` to the lane of slot `i` and clears the batch.
    ///
    /// If the engine failed, or did not return exactly one image per slot,
    /// every slot receives an [`Error::Engine`] instead. An empty image fails
    /// only its own slot.
    pub fn scatter(&mut self, outputs: Result<Vec<Image>>) -> Scatter {
        let routes = mem::take(&mut self.routes);
        self.inputs.clear();

        let failure = match outputs {
            Ok(images) if images.len() == routes.len() => {
                let mut scatter = Scatter::default();
                for (route, image) in routes.into_iter().zip(images) {
                    deliver(route, checked(image), &mut scatter);
                }
                return scatter;
            }
            Ok(images) => Error::Engine {
                reason: format!(
                    "engine returned {} image(s) for {} job(s)",
                    images.len(),
                    routes.len()
                ),
            },
            Err(e @ Error::Engine { .. }) => e,
            Err(e) => Error::Engine {
                reason: e.to_string(),
            },
        };

        let mut scatter = Scatter::default();
        for route in routes {
            deliver(route, Err(failure.clone()), &mut scatter);
        }
        scatter
    }
}

fn checked(image: Image) -> Result<Image> {
    if image.is_empty() {
        return Err(Error::Engine {
            reason: format!(
                "engine returned an empty {}x{}x{} image",
                image.width(),
                image.height(),
                image.bands()
            ),
        });
    }
    Ok(image)
}

fn deliver(route: Route, outcome: Result<Image>, scatter: &mut Scatter) {
    let delivery = Delivery {
        item: route.item,
        outcome,
    };
    // Lanes are sized to their item count, so a full channel cannot happen;
    // a failed send means the worker is gone.
    if route.reply.try_send(delivery).is_ok() {
        scatter.delivered += 1;
    } else {
        tracing::trace!(lane = route.lane, item = route.item, "Worker gone, dropping result");
        scatter.dropped += 1;
    }
}
