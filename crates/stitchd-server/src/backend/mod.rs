//! Reference implementations of the engine and raster store.
//!
//! They make the binary runnable end to end without a trained model or a
//! raster library; production deployments plug their own implementations of
//! [`stitchd_core::InferenceEngine`] and [`stitchd_core::RasterProvider`]
//! into [`crate::server::service::handler::ImputeService`].

pub mod engine;
pub mod raster;

pub use engine::{ModelDescriptor, ReferenceEngine};
pub use raster::SidecarRasterProvider;
