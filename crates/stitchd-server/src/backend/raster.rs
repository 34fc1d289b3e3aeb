//! Raster metadata read from JSON sidecar files.
//!
//! The metadata of `/data/a.tif` lives in `/data/a.tif.json`:
//!
//! ```json
//! {
//!   "width": 256,
//!   "height": 256,
//!   "geotransform": [-120.5, 0.0001, 0.0, 37.25, 0.0, -0.0001],
//!   "projection": "GEOGCS[\"WGS 84\", ...]",
//!   "bands": [{ "pixel_type": 1, "no_data": 0.0 }, { "pixel_type": 1 }]
//! }
//! ```
//!
//! `pixel_type` uses GDAL's numeric codes and defaults to 1 (`Byte`).

use serde::Deserialize;
use std::path::PathBuf;
use stitchd_core::{BandInfo, Error, PixelType, RasterMetadata, RasterProvider, Result};

const DEFAULT_EXTENSION: &str = "json";

#[derive(Debug, Deserialize)]
struct Sidecar {
    width: u32,
    height: u32,
    geotransform: [f64; 6],
    #[serde(default)]
    projection: String,
    bands: Vec<SidecarBand>,
}

#[derive(Debug, Deserialize)]
struct SidecarBand {
    #[serde(default = "byte_code")]
    pixel_type: u32,
    #[serde(default)]
    no_data: Option<f64>,
}

const fn byte_code() -> u32 {
    PixelType::Byte.code()
}

#[derive(Debug, Clone)]
pub struct SidecarRasterProvider {
    extension: String,
}

impl Default for SidecarRasterProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SidecarRasterProvider {
    pub fn new() -> Self {
        Self::with_extension(DEFAULT_EXTENSION)
    }

    /// Uses `<path>.<extension>` as the sidecar file.
    pub fn with_extension(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
        }
    }

    pub fn sidecar_path(&self, path: &str) -> PathBuf {
        PathBuf::from(format!("{path}.{}", self.extension))
    }
}

impl RasterProvider for SidecarRasterProvider {
    fn metadata(&self, path: &str) -> Result<RasterMetadata> {
        let raster_error = |reason: String| Error::Raster {
            path: path.to_string(),
            reason,
        };

        let sidecar_path = self.sidecar_path(path);
        let raw = std::fs::read_to_string(&sidecar_path)
            .map_err(|e| raster_error(format!("cannot read {}: {e}", sidecar_path.display())))?;
        let sidecar: Sidecar = serde_json::from_str(&raw)
            .map_err(|e| raster_error(format!("invalid {}: {e}", sidecar_path.display())))?;

        if sidecar.width == 0 || sidecar.height == 0 {
            return Err(raster_error(format!(
                "raster has empty extent {}x{}",
                sidecar.width, sidecar.height
            )));
        }
        if sidecar.bands.is_empty() {
            return Err(raster_error("raster has no bands".to_string()));
        }

        Ok(RasterMetadata {
            width: sidecar.width,
            height: sidecar.height,
            geotransform: sidecar.geotransform,
            projection: sidecar.projection,
            bands: sidecar
                .bands
                .into_iter()
                .map(|band| BandInfo {
                    pixel_type: PixelType::from_code(band.pixel_type),
                    no_data: band.no_data,
                })
                .collect(),
        })
    }
}
