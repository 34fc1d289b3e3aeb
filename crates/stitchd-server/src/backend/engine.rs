//! A deterministic stand-in for a trained imputation model.
//!
//! The model descriptor is JSON naming the output shape:
//!
//! ```json
//! { "name": "unet-v2", "width": 256, "height": 256, "bands": 3 }
//! ```
//!
//! The weights file only has to exist. Each output pixel is derived from the
//! geohash code, the week of the year and the band, which is enough to tell
//! items apart end to end.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use stitchd_core::{EngineInput, Error, Image, InferenceEngine, Result};

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_bands")]
    pub bands: usize,
}

const fn default_bands() -> usize {
    3
}

impl ModelDescriptor {
    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(engine_error(format!(
                "model output shape {}x{} is empty",
                self.width, self.height
            )));
        }
        if self.bands == 0 || self.bands > usize::from(u8::MAX) {
            return Err(engine_error(format!(
                "model declares {} bands, expected 1..=255",
                self.bands
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ReferenceEngine {
    descriptor: ModelDescriptor,
    weights: Option<PathBuf>,
    calls: u64,
}

impl ReferenceEngine {
    /// # Errors
    ///
    /// Returns [`Error::Engine`] if the shape is unusable.
    pub fn new(descriptor: ModelDescriptor) -> Result<Self> {
        descriptor.validate()?;
        Ok(Self {
            descriptor,
            weights: None,
            calls: 0,
        })
    }

    /// Loads the descriptor at `model` and checks that `weights` is a file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Engine`] if either file is missing or the descriptor
    /// does not parse.
    pub fn load(model: &Path, weights: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(model)
            .map_err(|e| engine_error(format!("cannot read model {}: {e}", model.display())))?;
        let descriptor: ModelDescriptor = serde_json::from_str(&raw)
            .map_err(|e| engine_error(format!("invalid model {}: {e}", model.display())))?;

        let meta = std::fs::metadata(weights)
            .map_err(|e| engine_error(format!("cannot read weights {}: {e}", weights.display())))?;
        if !meta.is_file() {
            return Err(engine_error(format!(
                "weights {} is not a file",
                weights.display()
            )));
        }

        let mut engine = Self::new(descriptor)?;
        engine.weights = Some(weights.to_path_buf());
        Ok(engine)
    }

    pub const fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn weights(&self) -> Option<&Path> {
        self.weights.as_deref()
    }

    /// Engine calls made so far, warm-up included.
    pub const fn calls(&self) -> u64 {
        self.calls
    }

    fn render(&self, input: &EngineInput) -> Result<Image> {
        let ModelDescriptor {
            width,
            height,
            bands,
            ..
        } = self.descriptor;

        let week = input.timestamp.div_euclid(SECONDS_PER_DAY).rem_euclid(365) / 7;
        let base = (input.geohash_code as u64)
            .wrapping_mul(37)
            .wrapping_add(week as u64 * 11);

        let mut pixels = Vec::with_capacity(width as usize * height as usize * bands);
        for row in 0..height {
            for col in 0..width {
                for band in 0..bands {
                    let value = base
                        .wrapping_add(band as u64 * 85)
                        .wrapping_add(u64::from(row / 16 + col / 16));
                    pixels.push((value % 256) as u8);
                }
            }
        }

        Image::new(width, height, bands, pixels)
    }
}

impl InferenceEngine for ReferenceEngine {
    fn warm_up(&mut self) -> Result<()> {
        let probe = EngineInput {
            geohash_code: 0,
            timestamp: 0,
            source_image_paths: Vec::new(),
            reference_image_path: String::new(),
        };
        let outputs = self.impute(core::slice::from_ref(&probe))?;
        if outputs.len() != 1 {
            return Err(engine_error(format!(
                "warm-up produced {} images",
                outputs.len()
            )));
        }
        Ok(())
    }

    fn impute(&mut self, inputs: &[EngineInput]) -> Result<Vec<Image>> {
        self.calls += 1;
        inputs.iter().map(|input| self.render(input)).collect()
    }
}

fn engine_error(reason: String) -> Error {
    Error::Engine { reason }
}
