//! Job routing between IO workers and the single inference engine.
//!
//! Every connection owns a [`lane::WorkerLane`]; its dispatcher end is
//! registered with the [`dispatcher::Dispatcher`] through the
//! [`manager::DispatchPool`]. There is no shared job queue: the dispatcher
//! polls lanes round-robin and routes each result back over the lane its job
//! arrived on.

pub mod batch;
pub mod dispatcher;
pub mod lane;
pub mod manager;
