//! Interface to the inference engine that performs the imputation.
//!
//! The engine is an opaque, expensive resource: it is warmed up once and then
//! driven by exactly one owner (the dispatcher). Implementations therefore
//! take `&mut self` and are only required to be `Send`.

use crate::{Image, Result};

/// Engine-facing view of one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineInput {
    /// Index of the request's geohash in the startup vocabulary.
    pub geohash_code: usize,
    /// Epoch seconds.
    pub timestamp: i64,
    pub source_image_paths: Vec<String>,
    pub reference_image_path: String,
}

/// A batched `inputs -> images` function.
pub trait InferenceEngine: Send + 'static {
    /// Called once before the first batch. The first call into most engines
    /// builds their execution graph, so it is paid at startup instead.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Produces exactly one image per input, in input order.
    ///
    /// # Errors
    ///
    /// Any error fails the whole batch.
    fn impute(&mut self, inputs: &[EngineInput]) -> Result<Vec<Image>>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }

    fn impute(&mut self, inputs: &[EngineInput]) -> Result<Vec<Image>> {
        (**self).impute(inputs)
    }
}
