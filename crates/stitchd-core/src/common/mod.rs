pub mod engine;
mod error;
pub mod raster;
pub mod types;

pub use engine::{EngineInput, InferenceEngine};
pub use error::*;
pub use raster::RasterProvider;
pub use types::*;
